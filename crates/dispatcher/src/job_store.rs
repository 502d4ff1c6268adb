//! 持久化的周期任务存储
//!
//! 调度记录保存在数据库中，进程只负责轮询：按 `process_every_seconds` 查询到期记录，
//! 用条件更新抢锁，抢到锁的记录交给 [`JobHandler`] 执行，完成后写回下一次执行时间。
//! 多个进程共享同一张表时，同一条记录在一个周期内只会被一个进程执行。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use scheduler_core::{
    config::StoreConfig,
    models::{environment_prefix, ScheduleDefinition, ScheduleRecord},
    traits::{JobHandler, ScheduleRegistry, ScheduleRepository},
    Result, SchedulerError,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::cron_utils::CronScheduler;

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// 存储生命周期：未启动时的操作为空操作，停止后的操作返回 [`SchedulerError::StoreStopped`]
pub struct RecurringJobStore {
    repository: Arc<dyn ScheduleRepository>,
    handler: Arc<dyn JobHandler>,
    config: StoreConfig,
    metrics: Arc<MetricsCollector>,
    state: AtomicU8,
    semaphore: Arc<Semaphore>,
}

impl RecurringJobStore {
    pub fn new(
        repository: Arc<dyn ScheduleRepository>,
        handler: Arc<dyn JobHandler>,
        config: StoreConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            repository,
            handler,
            config,
            metrics,
            state: AtomicU8::new(NOT_STARTED),
            semaphore,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STOPPED
    }

    /// 运行中返回 true；未启动返回 false（调用方按空操作处理）；已停止返回错误
    fn accepting(&self, operation: &str, target: &str) -> Result<bool> {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => Ok(true),
            STOPPED => Err(SchedulerError::StoreStopped(format!("{operation} {target}"))),
            _ => {
                warn!("调度存储尚未启动，忽略{}: {}", operation, target);
                Ok(false)
            }
        }
    }

    /// 启动存储：清空遗留锁，分页加载全部记录并按当前时间重新计算下一次执行时间
    ///
    /// 返回恢复的记录数。恢复后的记录不会立即执行，首次执行发生在下一个自然周期。
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<u64> {
        let cleared = self.repository.clear_locks().await?;
        if cleared > 0 {
            info!("已清空 {} 条遗留锁", cleared);
        }

        let batch_size = self.config.load_batch_size;
        let mut offset = 0;
        let mut restored = 0u64;
        let now = Utc::now();

        loop {
            let page = self.repository.list_page(batch_size, offset).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;

            for record in page {
                match next_run_after(&record.cron_expression, record.timezone.as_deref(), now) {
                    Ok(next_run_at) => {
                        self.repository
                            .update_next_run(&record.name, next_run_at)
                            .await?;
                        restored += 1;
                        debug!("恢复调度 {}，下次执行: {}", record.name, next_run_at);
                    }
                    Err(e) => {
                        // 保留过期的 next_run_at 会让它在第一次轮询时立即执行
                        warn!("调度 {} 没有下一次执行时间，移除: {}", record.name, e);
                        self.repository.delete_by_name(&record.name).await?;
                        offset -= 1;
                    }
                }
            }
        }

        self.state.store(RUNNING, Ordering::SeqCst);
        self.metrics.record_schedules_rehydrated(restored);
        info!("Started cron job scheduler, {} schedules restored", restored);
        Ok(restored)
    }

    /// 停止后注册和取消都会返回错误，应在入站消费者排空之后调用
    pub fn stop(&self) {
        if self.state.swap(STOPPED, Ordering::SeqCst) == RUNNING {
            info!("Stopped cron job scheduler");
        }
    }

    /// 轮询循环，收到关闭信号后在当前批次执行完成后退出。退出不会停止存储
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker =
            tokio::time::interval(StdDuration::from_secs(self.config.process_every_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_due_jobs().await {
                        error!("处理到期调度失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止调度轮询");
                    break;
                }
            }
        }
    }

    /// 执行一轮到期调度，返回本轮执行的记录数
    pub async fn process_due_jobs(&self) -> Result<usize> {
        if !self.is_started() {
            return Ok(0);
        }

        let now = Utc::now().trunc_subsecs(3);
        let lock_expired_before =
            now - Duration::seconds(self.config.default_lock_lifetime_seconds as i64);
        let limit = self.config.effective_lock_limit() as i64;

        let due = self
            .repository
            .find_due(now, lock_expired_before, limit)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!("发现 {} 个到期调度", due.len());

        let mut jobs = JoinSet::new();
        for record in due {
            // 不能提前返回：丢弃 JoinSet 会中断已持锁的执行
            match self
                .repository
                .try_lock(&record.name, now, lock_expired_before)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!("调度 {} 已被其他进程锁定，跳过", record.name);
                    continue;
                }
                Err(e) => {
                    error!("锁定调度 {} 失败，跳过本轮: {}", record.name, e);
                    continue;
                }
            }

            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|e| SchedulerError::Internal(format!("获取执行许可失败: {e}")))?;

            let repository = Arc::clone(&self.repository);
            let handler = Arc::clone(&self.handler);
            let metrics = Arc::clone(&self.metrics);
            jobs.spawn(async move {
                let _permit = permit;
                run_locked_job(repository, handler, metrics, record, now).await;
            });
        }

        let mut executed = 0;
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(()) => executed += 1,
                Err(e) => error!("调度执行任务异常退出: {}", e),
            }
        }

        Ok(executed)
    }
}

/// 执行一条已加锁的记录并释放锁
async fn run_locked_job(
    repository: Arc<dyn ScheduleRepository>,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<MetricsCollector>,
    record: ScheduleRecord,
    locked_at: DateTime<Utc>,
) {
    StructuredLogger::log_schedule_fired(&record.name, &record.data.env_id, &record.data.task_id);

    let success = match handler.handle(&record).await {
        Ok(()) => true,
        Err(e) => {
            StructuredLogger::log_fire_failed(&record.name, &e.to_string());
            false
        }
    };
    metrics.record_schedule_fired(success);

    let finished_at = Utc::now();
    let next_run_at =
        match next_run_after(&record.cron_expression, record.timezone.as_deref(), locked_at) {
            Ok(next) => next,
            Err(e) => {
                warn!("调度 {} 没有下一次执行时间，移除: {}", record.name, e);
                if let Err(e) = repository.delete_by_name(&record.name).await {
                    error!("移除调度 {} 失败: {}", record.name, e);
                }
                return;
            }
        };

    match repository
        .complete_run(&record.name, locked_at, finished_at, next_run_at)
        .await
    {
        Ok(true) => debug!("调度 {} 完成，下次执行: {}", record.name, next_run_at),
        Ok(false) => debug!("调度 {} 在执行期间被重新注册或取消", record.name),
        Err(e) => error!("写回调度 {} 的执行结果失败: {}", record.name, e),
    }
}

fn next_run_after(
    cron_expression: &str,
    timezone: Option<&str>,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    CronScheduler::with_timezone(cron_expression, timezone)?
        .next_execution_time(after)
        .ok_or_else(|| SchedulerError::InvalidCron {
            expr: cron_expression.to_string(),
            message: "没有后续的执行时间".to_string(),
        })
}

#[async_trait]
impl ScheduleRegistry for RecurringJobStore {
    #[instrument(skip(self, definition), fields(name = %definition.name))]
    async fn register_schedule(&self, definition: ScheduleDefinition) -> Result<()> {
        if !self.accepting("注册", &definition.name)? {
            return Ok(());
        }

        let next_run_at = next_run_after(
            &definition.cron_expression,
            definition.timezone.as_deref(),
            Utc::now(),
        )?;
        let record = ScheduleRecord::from_definition(definition, next_run_at);
        self.repository.replace(&record).await?;

        info!("已注册调度 {}，首次执行: {}", record.name, next_run_at);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_schedule(&self, name: &str) -> Result<()> {
        if !self.accepting("取消", name)? {
            return Ok(());
        }

        let removed = self.repository.delete_by_name(name).await?;
        debug!("取消调度 {}，删除 {} 条记录", name, removed);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_schedules_by_prefix(&self, env_id: &str) -> Result<u64> {
        if !self.accepting("批量取消", env_id)? {
            return Ok(0);
        }

        let removed = self
            .repository
            .delete_by_prefix(&environment_prefix(env_id))
            .await?;
        info!("取消环境 {} 的 {} 个调度", env_id, removed);
        Ok(removed)
    }
}
