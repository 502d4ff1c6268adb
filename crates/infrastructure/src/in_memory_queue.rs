use async_trait::async_trait;
use scheduler_core::{traits::MessagePublisher, Result, SchedulerError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// 内存消息发布器
///
/// 按队列名保存已发布的消息，用于嵌入式部署和测试。可以切换为失败模式来模拟 broker 不可用。
#[derive(Debug, Default, Clone)]
pub struct InMemoryPublisher {
    queues: Arc<RwLock<HashMap<String, Vec<Vec<u8>>>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的发布全部失败，直到再次调用并传入 false
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queues
            .read()
            .await
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn total_messages(&self) -> usize {
        self.queues.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::MessageQueue(format!(
                "发布消息到队列 {queue} 失败: broker unavailable"
            )));
        }

        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .push(payload.to_vec());

        debug!("消息已发布到内存队列: {}", queue);
        Ok(())
    }
}
