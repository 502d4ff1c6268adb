use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::instrument;

use scheduler_core::{
    config::MessageQueueConfig,
    models::{DispatchMessage, ScheduleData, ScheduleRecord, TrackingEntry},
    traits::{JobHandler, MessagePublisher, TrackingRepository},
    Result,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

/// 一次触发的分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published { queue: String, tracking_id: String },
    /// 发布失败，跟踪记录已写入但消息丢失
    Dropped { queue: String, reason: String },
}

/// 调度到期时写入跟踪记录，并把分发消息发布到环境的随机分片队列
pub struct TaskFireHandler {
    tracking: Arc<dyn TrackingRepository>,
    publisher: Arc<dyn MessagePublisher>,
    queue_config: MessageQueueConfig,
    metrics: Arc<MetricsCollector>,
}

impl TaskFireHandler {
    pub fn new(
        tracking: Arc<dyn TrackingRepository>,
        publisher: Arc<dyn MessagePublisher>,
        queue_config: MessageQueueConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            tracking,
            publisher,
            queue_config,
            metrics,
        }
    }

    /// 在 `1..=task_process_queue_count` 中均匀随机选择分片
    pub fn pick_queue(&self, env_id: &str) -> String {
        let shard = rand::rng().random_range(1..=self.queue_config.task_process_queue_count);
        self.queue_config.process_task_queue_name(env_id, shard)
    }

    /// 跟踪记录写入失败时返回错误且不发布；发布失败只记录日志
    #[instrument(skip(self, data), fields(env_id = %data.env_id, task_id = %data.task_id))]
    pub async fn fire(&self, data: &ScheduleData) -> Result<DispatchOutcome> {
        let entry = TrackingEntry::pending(&data.task_id, &data.task_name);
        self.tracking.insert(&data.env_id, &entry).await?;

        let message = DispatchMessage {
            task_id: data.task_id.clone(),
            env_id: data.env_id.clone(),
            task_name: data.task_name.clone(),
            tracking_id: entry.tracking_id.clone(),
        };
        let payload = message.serialize_bytes()?;
        let queue = self.pick_queue(&data.env_id);

        match self.publisher.publish(&queue, &payload).await {
            Ok(()) => {
                self.metrics.record_dispatch(true);
                StructuredLogger::log_dispatch_published(
                    &queue,
                    &data.env_id,
                    &data.task_id,
                    &entry.tracking_id,
                );
                Ok(DispatchOutcome::Published {
                    queue,
                    tracking_id: entry.tracking_id,
                })
            }
            Err(e) => {
                self.metrics.record_dispatch(false);
                let reason = e.to_string();
                StructuredLogger::log_dispatch_dropped(&queue, &data.env_id, &data.task_id, &reason);
                Ok(DispatchOutcome::Dropped { queue, reason })
            }
        }
    }
}

#[async_trait]
impl JobHandler for TaskFireHandler {
    async fn handle(&self, record: &ScheduleRecord) -> Result<()> {
        self.fire(&record.data).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::{models::TrackingStatus, SchedulerError};
    use scheduler_infrastructure::InMemoryPublisher;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTracking {
        entries: Mutex<Vec<(String, TrackingEntry)>>,
        fail: bool,
    }

    #[async_trait]
    impl TrackingRepository for FakeTracking {
        async fn insert(&self, env_id: &str, entry: &TrackingEntry) -> Result<()> {
            if self.fail {
                return Err(SchedulerError::DatabaseOperation("disk full".to_string()));
            }
            self.entries
                .lock()
                .unwrap()
                .push((env_id.to_string(), entry.clone()));
            Ok(())
        }

        async fn list_by_env(&self, env_id: &str) -> Result<Vec<TrackingEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(env, _)| env == env_id)
                .map(|(_, entry)| entry.clone())
                .collect())
        }
    }

    fn data() -> ScheduleData {
        ScheduleData {
            env_id: "e1".to_string(),
            task_id: "t1".to_string(),
            task_name: "nightly".to_string(),
        }
    }

    fn handler(
        tracking: Arc<FakeTracking>,
        publisher: Arc<InMemoryPublisher>,
        queue_config: MessageQueueConfig,
    ) -> TaskFireHandler {
        TaskFireHandler::new(
            tracking,
            publisher,
            queue_config,
            Arc::new(MetricsCollector::new()),
        )
    }

    #[tokio::test]
    async fn test_fire_writes_tracking_then_publishes() {
        let tracking = Arc::new(FakeTracking::default());
        let publisher = Arc::new(InMemoryPublisher::new());
        let handler = handler(tracking.clone(), publisher.clone(), MessageQueueConfig::default());

        let outcome = handler.fire(&data()).await.unwrap();
        let DispatchOutcome::Published { queue, tracking_id } = outcome else {
            panic!("expected published outcome");
        };
        assert!(queue.starts_with("process-task-e1-"));

        let entries = tracking.list_by_env("e1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, TrackingStatus::Pending);
        assert_eq!(entries[0].tracking_id, tracking_id);

        let messages = publisher.messages(&queue).await;
        assert_eq!(messages.len(), 1);
        let message = DispatchMessage::deserialize_bytes(&messages[0]).unwrap();
        assert_eq!(message.tracking_id, tracking_id);
        assert_eq!(message.task_name, "nightly");
    }

    #[tokio::test]
    async fn test_shards_stay_in_range_and_carry_suffix() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let queue_config = MessageQueueConfig {
            task_process_queue_count: 3,
            development_suffix: "-dev".to_string(),
            ..Default::default()
        };
        let handler = handler(Arc::new(FakeTracking::default()), publisher.clone(), queue_config);

        for _ in 0..200 {
            handler.fire(&data()).await.unwrap();
        }

        let allowed: HashSet<String> = (1..=3)
            .map(|shard| format!("process-task-e1-{shard}-dev"))
            .collect();
        let used: HashSet<String> = publisher.queue_names().await.into_iter().collect();
        assert!(used.is_subset(&allowed));
        assert!(used.len() > 1, "随机分片应覆盖多个队列");
        assert_eq!(publisher.total_messages().await, 200);
    }

    #[tokio::test]
    async fn test_each_firing_gets_fresh_tracking_id() {
        let tracking = Arc::new(FakeTracking::default());
        let handler = handler(
            tracking.clone(),
            Arc::new(InMemoryPublisher::new()),
            MessageQueueConfig::default(),
        );

        handler.fire(&data()).await.unwrap();
        handler.fire(&data()).await.unwrap();

        let entries = tracking.list_by_env("e1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].tracking_id, entries[1].tracking_id);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let tracking = Arc::new(FakeTracking::default());
        let publisher = Arc::new(InMemoryPublisher::new());
        publisher.set_failing(true);
        let handler = handler(tracking.clone(), publisher.clone(), MessageQueueConfig::default());

        let outcome = handler.fire(&data()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Dropped { .. }));
        // 跟踪记录仍然保留 pending
        assert_eq!(tracking.list_by_env("e1").await.unwrap().len(), 1);
        assert_eq!(publisher.total_messages().await, 0);
    }

    #[tokio::test]
    async fn test_tracking_failure_prevents_publish() {
        let tracking = Arc::new(FakeTracking {
            fail: true,
            ..Default::default()
        });
        let publisher = Arc::new(InMemoryPublisher::new());
        let handler = handler(tracking, publisher.clone(), MessageQueueConfig::default());

        let err = handler.fire(&data()).await.unwrap_err();
        assert_eq!(err.kind(), "DatabaseOperationError");
        assert_eq!(publisher.total_messages().await, 0);
    }
}
