//! RabbitMQ 连接管理与消息发布
//!
//! [`BrokerConnectionManager`] 维护唯一的 broker 连接：启动时按固定间隔重试，连接因错误断开时自动重连，
//! 尝试次数在一次重连周期内累计，成功后清零，耗尽后调用退出钩子。主动 [`BrokerConnectionManager::disconnect`]
//! 不会触发重连。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Event, Queue,
};
use scheduler_core::{
    config::MessageQueueConfig, traits::MessagePublisher, Result, SchedulerError,
};
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::observability::{MetricsCollector, StructuredLogger};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// 重试次数耗尽，进程即将退出
    Exhausted,
}

/// 连接建立后由底层连接上报的终止事件
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Error(String),
    Closed,
}

/// 建立和关闭底层连接
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Self::Connection, mpsc::UnboundedReceiver<ConnectionEvent>)>;

    async fn close(&self, connection: &Self::Connection) -> Result<()>;
}

/// 每次连接建立后被调用，用于在新连接上重新注册消费者
#[async_trait]
pub trait ConnectionListener<T: Send + Sync>: Send + Sync {
    async fn on_connected(&self, connection: &T) -> Result<()>;
}

pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

fn exit_process(code: i32) {
    std::process::exit(code)
}

struct Inner<C: BrokerConnector> {
    connector: C,
    url: String,
    max_attempts: u32,
    reconnect_interval: Duration,
    connecting: AtomicBool,
    attempts: AtomicU32,
    closing: AtomicBool,
    close_requested: Notify,
    connection: RwLock<Option<C::Connection>>,
    listeners: RwLock<Vec<Arc<dyn ConnectionListener<C::Connection>>>>,
    state_tx: watch::Sender<ConnectionState>,
    exit_hook: ExitHook,
    metrics: Arc<MetricsCollector>,
}

pub struct BrokerConnectionManager<C: BrokerConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: BrokerConnector> Clone for BrokerConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: BrokerConnector> BrokerConnectionManager<C> {
    pub fn new(connector: C, config: &MessageQueueConfig, metrics: Arc<MetricsCollector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                url: config.url.clone(),
                max_attempts: config.retry_count,
                reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
                connecting: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                closing: AtomicBool::new(false),
                close_requested: Notify::new(),
                connection: RwLock::new(None),
                listeners: RwLock::new(Vec::new()),
                state_tx,
                exit_hook: Arc::new(exit_process),
                metrics,
            }),
        }
    }

    /// 替换重试耗尽时的退出行为，默认 `std::process::exit(1)`
    pub fn with_exit_hook(self, hook: ExitHook) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.exit_hook = hook;
                inner
            }
            Err(inner) => {
                warn!("连接管理器已被共享，忽略退出钩子替换");
                return Self { inner };
            }
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub async fn add_listener(&self, listener: Arc<dyn ConnectionListener<C::Connection>>) {
        self.inner.listeners.write().await.push(listener);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// 当前连接，未连接时为 None
    pub async fn connection(&self) -> Option<C::Connection> {
        self.inner.connection.read().await.clone()
    }

    /// 建立连接。已有连接尝试进行中时直接返回
    pub async fn connect(&self) -> Result<()> {
        Inner::connect_guarded(&self.inner).await
    }

    /// 主动关闭连接，不会触发重连
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.close_requested.notify_one();

        let connection = self.inner.connection.write().await.take();
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);

        if let Some(connection) = connection {
            self.inner.connector.close(&connection).await?;
            info!("RabbitMQ连接已关闭");
        }
        Ok(())
    }
}

impl<C: BrokerConnector> Inner<C> {
    async fn connect_guarded(inner: &Arc<Self>) -> Result<()> {
        if inner.connecting.swap(true, Ordering::SeqCst) {
            debug!("已有连接尝试进行中，跳过");
            return Ok(());
        }
        let result = Self::connect_loop(inner).await;
        inner.connecting.store(false, Ordering::SeqCst);

        // 标志位复位后再开始监听，已排队的断开事件才能触发重连
        Self::spawn_supervisor(Arc::clone(inner), result?);
        Ok(())
    }

    async fn connect_loop(inner: &Arc<Self>) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>> {
        inner.closing.store(false, Ordering::SeqCst);
        let masked_url = mask_amqp_url(&inner.url);

        loop {
            let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            inner.state_tx.send_replace(ConnectionState::Connecting);

            match inner.connector.connect(&inner.url).await {
                Ok((connection, events)) => {
                    inner.metrics.record_broker_connect_attempt(true);
                    inner.attempts.store(0, Ordering::SeqCst);
                    *inner.connection.write().await = Some(connection.clone());
                    inner.state_tx.send_replace(ConnectionState::Connected);
                    StructuredLogger::log_broker_connected(&masked_url, attempt);

                    let listeners = inner.listeners.read().await.clone();
                    for listener in listeners {
                        if let Err(e) = listener.on_connected(&connection).await {
                            error!("连接建立后的回调执行失败: {}", e);
                        }
                    }

                    return Ok(events);
                }
                Err(e) => {
                    inner.metrics.record_broker_connect_attempt(false);
                    StructuredLogger::log_broker_connect_failed(
                        &masked_url,
                        attempt,
                        inner.max_attempts,
                        &e.to_string(),
                    );

                    if attempt >= inner.max_attempts {
                        StructuredLogger::log_broker_retries_exhausted(&masked_url, attempt);
                        inner.state_tx.send_replace(ConnectionState::Exhausted);
                        (inner.exit_hook)(1);
                        return Err(SchedulerError::BrokerRetriesExhausted { attempts: attempt });
                    }

                    tokio::time::sleep(inner.reconnect_interval).await;
                }
            }
        }
    }

    /// 等待连接的第一个终止事件，按关闭原因决定是否重连
    fn spawn_supervisor(inner: Arc<Self>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            let event = loop {
                tokio::select! {
                    event = events.recv() => break event.unwrap_or(ConnectionEvent::Closed),
                    _ = inner.close_requested.notified() => {
                        if inner.closing.load(Ordering::SeqCst) {
                            return;
                        }
                    }
                }
            };

            if inner.closing.load(Ordering::SeqCst) {
                debug!("连接已主动关闭，忽略终止事件: {:?}", event);
                return;
            }

            *inner.connection.write().await = None;
            inner.state_tx.send_replace(ConnectionState::Disconnected);

            match event {
                ConnectionEvent::Error(message) => {
                    warn!("RabbitMQ连接异常断开: {}，开始重连", message);
                    if let Err(e) = Self::connect_guarded(&inner).await {
                        error!("RabbitMQ重连失败: {}", e);
                    }
                }
                ConnectionEvent::Closed => {
                    info!("RabbitMQ连接已正常关闭，不再重连");
                }
            }
        });
        tokio::spawn(task);
    }
}

/// lapin 连接器
#[derive(Debug, Default, Clone)]
pub struct LapinConnector;

#[async_trait]
impl BrokerConnector for LapinConnector {
    type Connection = Arc<Connection>;

    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Self::Connection, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut events = Box::pin(connection.events_listener());
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Event::Error(err) => {
                        if tx.send(ConnectionEvent::Error(err.to_string())).is_err() {
                            break;
                        }
                    }
                    other => debug!("RabbitMQ连接事件: {:?}", other),
                }
            }
        });

        Ok((Arc::new(connection), rx))
    }

    async fn close(&self, connection: &Self::Connection) -> Result<()> {
        connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))
    }
}

pub type RabbitMqConnectionManager = BrokerConnectionManager<LapinConnector>;

/// 声明持久化队列，已存在时为幂等操作
pub async fn declare_durable_queue(channel: &Channel, queue_name: &str) -> Result<Queue> {
    let queue = channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| SchedulerError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}")))?;

    debug!("队列 {} 声明成功", queue_name);
    Ok(queue)
}

/// 每次发布都在当前连接上新开一个通道，发布完成后关闭
pub struct RabbitMqPublisher {
    broker: RabbitMqConnectionManager,
}

impl RabbitMqPublisher {
    pub fn new(broker: RabbitMqConnectionManager) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl MessagePublisher for RabbitMqPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let connection = self
            .broker
            .connection()
            .await
            .ok_or_else(|| SchedulerError::MessageQueue("RabbitMQ未连接".to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        let result = async {
            declare_durable_queue(&channel, queue).await?;

            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| SchedulerError::MessageQueue(format!("开启发布确认失败: {e}")))?;

            let properties = BasicProperties::default()
                .with_delivery_mode(2) // 2 = persistent
                .with_content_type("application/json".into())
                .with_timestamp(chrono::Utc::now().timestamp() as u64);

            let confirm = channel
                .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
                .await
                .map_err(|e| {
                    SchedulerError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
                })?;

            confirm
                .await
                .map_err(|e| SchedulerError::MessageQueue(format!("消息发布确认失败: {e}")))?;

            debug!("消息已发布到队列: {}", queue);
            Ok::<(), SchedulerError>(())
        }
        .await;

        if let Err(e) = channel.close(200, "发布完成").await {
            debug!("关闭发布通道失败: {}", e);
        }

        result
    }
}

/// 隐藏 AMQP URL 中的密码部分，用于日志输出
pub fn mask_amqp_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };
    let credentials = &rest[..at];
    match credentials.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..scheme_end + 3],
            &credentials[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}
