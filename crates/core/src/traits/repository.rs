use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{ScheduleRecord, TrackingEntry},
    Result,
};

/// 调度记录持久化接口
///
/// 记录按 `name` 唯一。锁相关的方法都是条件更新，多个进程共享同一张表时只有一个能抢到锁。
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// 清空所有记录的 `locked_at` 和 `last_finished_at`，返回受影响行数
    async fn clear_locks(&self) -> Result<u64>;

    /// 按名称排序分页读取
    async fn list_page(&self, limit: i64, offset: i64) -> Result<Vec<ScheduleRecord>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<ScheduleRecord>>;

    /// 同一事务内删除同名记录并插入新记录
    async fn replace(&self, record: &ScheduleRecord) -> Result<()>;

    async fn delete_by_name(&self, name: &str) -> Result<u64>;

    /// 删除名称以 `prefix` 开头的全部记录，`prefix` 按字面匹配
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;

    async fn update_next_run(&self, name: &str, next_run_at: DateTime<Utc>) -> Result<()>;

    /// 查询已到期且未被有效锁定的记录
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        lock_expired_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduleRecord>>;

    /// 尝试加锁，成功返回 true
    async fn try_lock(
        &self,
        name: &str,
        now: DateTime<Utc>,
        lock_expired_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// 释放本次持有的锁并写入下一次执行时间。锁已被替换（记录被重新注册或取消）时返回 false
    async fn complete_run(
        &self,
        name: &str,
        locked_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn count(&self) -> Result<i64>;
}

/// 触发跟踪记录持久化接口，按环境分区、按 trackingId 唯一
#[async_trait]
pub trait TrackingRepository: Send + Sync {
    async fn insert(&self, env_id: &str, entry: &TrackingEntry) -> Result<()>;

    async fn list_by_env(&self, env_id: &str) -> Result<Vec<TrackingEntry>>;
}
