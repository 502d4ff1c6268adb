//! 入站队列消费者
//!
//! 每种操作（deploy / redeploy / undeploy / delete）绑定 `general_queue_count` 个分片队列，
//! 每个分片一个通道，prefetch 为 1。消息无论处理成功、失败还是无法解析都会被确认，
//! 处理结果通过回调报告给平台，而不是通过重新投递。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{options::*, types::FieldTable, Channel, Connection, Consumer};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{debug, error, info, instrument, warn};

use scheduler_core::{
    config::MessageQueueConfig,
    models::{TaskOperation, TaskRequest},
    traits::{ScheduleRegistry, StatusReporter},
    Result, SchedulerError,
};
use scheduler_infrastructure::{
    declare_durable_queue, ConnectionListener, MetricsCollector, StructuredLogger,
};

use crate::task_manager::{OperationResult, TaskManager};

/// 单条入站消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Processed(OperationResult),
    /// 消息无法解析或校验失败，已丢弃
    Rejected { reason: String },
}

/// 解析入站消息并交给生命周期管理器，与 broker 无关
#[derive(Clone)]
pub struct RequestProcessor {
    registry: Arc<dyn ScheduleRegistry>,
    reporter: Arc<dyn StatusReporter>,
    metrics: Arc<MetricsCollector>,
}

impl RequestProcessor {
    pub fn new(
        registry: Arc<dyn ScheduleRegistry>,
        reporter: Arc<dyn StatusReporter>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            reporter,
            metrics,
        }
    }

    #[instrument(skip_all, fields(queue = %queue, operation = %operation))]
    pub async fn process(&self, queue: &str, operation: TaskOperation, body: &[u8]) -> ConsumeOutcome {
        let request = match TaskRequest::parse(operation, body) {
            Ok(request) => request,
            Err(e) => {
                let reason = e.to_string();
                self.metrics.record_message_rejected();
                StructuredLogger::log_message_rejected(queue, operation.as_str(), &reason);
                return ConsumeOutcome::Rejected { reason };
            }
        };

        let app = request.app().name.clone();
        let env = request.env().clone();
        let (doing, action) = verbs(operation);

        StructuredLogger::log_request_received(
            queue,
            operation.as_str(),
            &env.iid,
            request.tasks().len(),
        );
        info!(
            "Started {} app '{}' version '{}' environment '{}'",
            doing, app, env.version.name, env.name
        );

        let started = Instant::now();
        let mut manager = TaskManager::new(request, self.registry.clone(), self.reporter.clone());
        let result = manager.execute().await;
        self.metrics.record_lifecycle_operation(
            operation.as_str(),
            result.success,
            started.elapsed().as_secs_f64(),
        );

        if result.success {
            info!(
                "Completed {} app '{}' version '{}' environment '{}' successfully",
                doing, app, env.version.name, env.name
            );
        } else {
            error!(
                org_id = %env.org_id,
                app_id = %env.app_id,
                version_id = %env.version_id,
                error = result.error.as_deref().unwrap_or_default(),
                "Cannot {} app '{}' version '{}' environment '{}'",
                action,
                app,
                env.version.name,
                env.name
            );
        }

        ConsumeOutcome::Processed(result)
    }
}

fn verbs(operation: TaskOperation) -> (&'static str, &'static str) {
    match operation {
        TaskOperation::Deploy => ("deploying", "deploy"),
        TaskOperation::Redeploy => ("redeploying", "redeploy"),
        TaskOperation::Undeploy => ("undeploying", "undeploy"),
        TaskOperation::Delete => ("deleting", "delete"),
    }
}

/// 关闭时的排空闸门：每条消息处理期间持有读锁，排空时取写锁等待全部处理结束
#[derive(Clone, Default)]
pub struct DrainGate {
    draining: Arc<AtomicBool>,
    in_flight: Arc<RwLock<()>>,
}

impl DrainGate {
    /// 开始处理一条消息；正在排空时返回 None，消息保持未确认，由 broker 重新投递
    pub async fn enter(&self) -> Option<OwnedRwLockReadGuard<()>> {
        // 先拿读锁再检查标志，排空返回之后不会再有消息进入处理
        let guard = Arc::clone(&self.in_flight).read_owned().await;
        if self.draining.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    pub async fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let _ = self.in_flight.write().await;
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// 在每次建立的连接上重新绑定全部入站队列
pub struct QueueConsumers {
    processor: RequestProcessor,
    queue_config: MessageQueueConfig,
    hostname: String,
    gate: DrainGate,
}

impl QueueConsumers {
    pub fn new(processor: RequestProcessor, queue_config: MessageQueueConfig) -> Self {
        Self {
            processor,
            queue_config,
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
            gate: DrainGate::default(),
        }
    }

    /// 停止接收新消息并等待正在处理的消息完成确认，之后才能断开 broker 和停止存储
    pub async fn drain(&self) {
        self.gate.drain().await;
        info!("入站消费者已排空");
    }

    /// 全部 (操作, 队列名) 绑定，按操作再按分片排列
    pub fn queue_bindings(&self) -> Vec<(TaskOperation, String)> {
        TaskOperation::ALL
            .iter()
            .flat_map(|operation| {
                (1..=self.queue_config.general_queue_count).map(move |shard| {
                    (
                        *operation,
                        self.queue_config
                            .inbound_queue_name(&operation.queue_prefix(), shard),
                    )
                })
            })
            .collect()
    }

    async fn bind(
        &self,
        connection: &Connection,
        operation: TaskOperation,
        queue: String,
    ) -> Result<()> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        declare_durable_queue(&channel, &queue).await?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("设置prefetch失败: {e}")))?;

        let consumer_tag = format!("{}-{}", self.hostname, queue);
        let consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建消费者失败: {e}")))?;

        info!("Listening messages from <{}> queue", queue);

        tokio::spawn(consume(
            self.processor.clone(),
            self.gate.clone(),
            channel,
            consumer,
            operation,
            queue,
        ));
        Ok(())
    }
}

#[async_trait]
impl ConnectionListener<Arc<Connection>> for QueueConsumers {
    async fn on_connected(&self, connection: &Arc<Connection>) -> Result<()> {
        if self.gate.is_draining() {
            debug!("消费者正在排空，不再绑定队列");
            return Ok(());
        }
        for (operation, queue) in self.queue_bindings() {
            self.bind(connection, operation, queue).await?;
        }
        Ok(())
    }
}

// prefetch 为 1，上一条确认之前 broker 不会投递下一条
async fn consume(
    processor: RequestProcessor,
    gate: DrainGate,
    channel: Channel,
    mut consumer: Consumer,
    operation: TaskOperation,
    queue: String,
) {
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("队列 {} 消费中断: {}", queue, e);
                break;
            }
        };

        let Some(_in_flight) = gate.enter().await else {
            debug!("队列 {} 正在排空，消息留待重新投递", queue);
            break;
        };

        processor.process(&queue, operation, &delivery.data).await;

        if let Err(e) = channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
        {
            warn!("确认队列 {} 的消息失败: {}", queue, e);
        }
    }

    debug!("队列 {} 的消费者已停止", queue);
}
