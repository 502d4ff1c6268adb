//! 定时任务存储与触发分发
//!
//! - [`job_store::RecurringJobStore`]: 持久化的周期调度，负责启动恢复、轮询、加锁和执行
//! - [`fire_handler::TaskFireHandler`]: 调度到期时写跟踪记录并发布分发消息
//! - [`cron_utils::CronScheduler`]: CRON 表达式解析和时区计算

pub mod cron_utils;
pub mod fire_handler;
pub mod job_store;

pub use cron_utils::CronScheduler;
pub use fire_handler::{DispatchOutcome, TaskFireHandler};
pub use job_store::RecurringJobStore;
