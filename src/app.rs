use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scheduler_core::config::AppConfig;
use scheduler_dispatcher::{RecurringJobStore, TaskFireHandler};
use scheduler_infrastructure::{
    install_prometheus_exporter, mask_amqp_url, DatabaseManager, LapinConnector,
    MetricsCollector, RabbitMqConnectionManager, RabbitMqPublisher,
};
use scheduler_worker::{HttpStatusReporter, QueueConsumers, RequestProcessor};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 组合根：持有数据库、broker 连接、定时任务存储和入站消费者
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    broker: RabbitMqConnectionManager,
    store: Arc<RecurringJobStore>,
    consumers: Arc<QueueConsumers>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        // exporter 必须先于指标句柄创建安装
        if config.observability.metrics_enabled {
            install_prometheus_exporter(&config.observability.metrics_bind_address)?;
        }
        let metrics = Arc::new(MetricsCollector::new());

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("数据库迁移失败")?;
        info!("数据库已就绪: {:?}", database.database_type());

        let broker =
            RabbitMqConnectionManager::new(LapinConnector, &config.message_queue, metrics.clone());
        let publisher = Arc::new(RabbitMqPublisher::new(broker.clone()));

        let fire_handler = Arc::new(TaskFireHandler::new(
            database.tracking_repository(),
            publisher,
            config.message_queue.clone(),
            metrics.clone(),
        ));
        let store = Arc::new(RecurringJobStore::new(
            database.schedule_repository(),
            fire_handler,
            config.store.clone(),
            metrics.clone(),
        ));

        let reporter = Arc::new(
            HttpStatusReporter::new(&config.callback, metrics.clone())
                .context("创建回调客户端失败")?,
        );
        let processor = RequestProcessor::new(store.clone(), reporter, metrics);
        let consumers = Arc::new(QueueConsumers::new(
            processor,
            config.message_queue.clone(),
        ));

        Ok(Self {
            config,
            database,
            broker,
            store,
            consumers,
        })
    }

    pub fn store(&self) -> &Arc<RecurringJobStore> {
        &self.store
    }

    pub fn consumers(&self) -> &Arc<QueueConsumers> {
        &self.consumers
    }

    /// 启动存储后再连接 broker，保证消费者收到的请求不会落在未启动的存储上
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let restored = self.store.start().await.context("启动定时任务存储失败")?;
        info!("定时任务存储已启动，恢复 {} 个调度", restored);

        self.broker.add_listener(self.consumers.clone()).await;
        info!(
            "连接RabbitMQ: {}",
            mask_amqp_url(&self.config.message_queue.url)
        );
        self.broker.connect().await.context("连接RabbitMQ失败")?;

        let store_handle = tokio::spawn(Arc::clone(&self.store).run(shutdown_rx.resubscribe()));

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        // 顺序：排空消费者 -> 等待轮询退出 -> 断开 broker -> 停止存储。
        // 存储先于消费者停止会让关闭期间到达的请求被确认却没有落库
        self.consumers.drain().await;

        if let Err(e) = store_handle.await {
            error!("调度轮询任务异常退出: {}", e);
        }

        if let Err(e) = self.broker.disconnect().await {
            warn!("断开RabbitMQ连接失败: {}", e);
        }
        self.store.stop();
        self.database.close().await;

        info!("应用已停止");
        Ok(())
    }
}

/// 优雅关闭的最长等待时间
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
