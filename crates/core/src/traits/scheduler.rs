use async_trait::async_trait;

use crate::{
    models::{ScheduleDefinition, ScheduleRecord},
    Result,
};

/// 生命周期管理器对定时任务存储的依赖
///
/// 存储尚未启动时所有操作直接返回 `Ok`。
#[async_trait]
pub trait ScheduleRegistry: Send + Sync {
    /// 先取消同名调度再创建，首次执行发生在下一个自然周期
    async fn register_schedule(&self, definition: ScheduleDefinition) -> Result<()>;

    /// 精确名称取消，不存在时无操作
    async fn cancel_schedule(&self, name: &str) -> Result<()>;

    /// 取消某个环境下的全部调度，返回取消的数量
    async fn cancel_schedules_by_prefix(&self, env_id: &str) -> Result<u64>;
}

/// 调度到期时的回调
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, record: &ScheduleRecord) -> Result<()>;
}
