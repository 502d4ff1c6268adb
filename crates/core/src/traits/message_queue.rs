use async_trait::async_trait;

use crate::Result;

/// 消息发布接口
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// 发布持久化消息到指定队列，队列不存在时以 durable 方式声明
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;
}
