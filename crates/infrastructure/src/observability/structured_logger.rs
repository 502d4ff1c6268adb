//! Structured logging utilities
//!
//! 每个函数对应一种可被日志平台检索的事件，`event` 字段的取值保持稳定。

use tracing::{error, info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    /// 到期调度已加锁，即将执行
    pub fn log_schedule_fired(name: &str, env_id: &str, task_id: &str) {
        info!(
            event = "schedule_fired",
            schedule.name = name,
            env.id = env_id,
            task.id = task_id,
            "Schedule fired"
        );
    }

    pub fn log_fire_failed(name: &str, error: &str) {
        error!(
            event = "fire_failed",
            schedule.name = name,
            error = error,
            "Schedule handler failed"
        );
    }

    pub fn log_dispatch_published(queue: &str, env_id: &str, task_id: &str, tracking_id: &str) {
        info!(
            event = "dispatch_published",
            queue = queue,
            env.id = env_id,
            task.id = task_id,
            tracking.id = tracking_id,
            "Dispatch message published"
        );
    }

    /// 发布失败只记录，不向上传播
    pub fn log_dispatch_dropped(queue: &str, env_id: &str, task_id: &str, error: &str) {
        warn!(
            event = "dispatch_dropped",
            queue = queue,
            env.id = env_id,
            task.id = task_id,
            error = error,
            "Dispatch message dropped"
        );
    }

    pub fn log_callback_dropped(url: &str, reason: &str) {
        warn!(
            event = "callback_dropped",
            callback.url = url,
            reason = reason,
            "Status callback dropped"
        );
    }

    pub fn log_message_rejected(queue: &str, operation: &str, error: &str) {
        warn!(
            event = "message_rejected",
            queue = queue,
            operation = operation,
            error = error,
            "Inbound message rejected"
        );
    }

    pub fn log_request_received(queue: &str, operation: &str, env_id: &str, task_count: usize) {
        info!(
            event = "request_received",
            queue = queue,
            operation = operation,
            env.id = env_id,
            task.count = task_count,
            "Lifecycle request received"
        );
    }

    pub fn log_broker_connected(url: &str, attempt: u32) {
        info!(
            event = "broker_connected",
            broker.url = url,
            attempt = attempt,
            "Connected to message broker"
        );
    }

    pub fn log_broker_connect_failed(url: &str, attempt: u32, max_attempts: u32, error: &str) {
        warn!(
            event = "broker_connect_failed",
            broker.url = url,
            attempt = attempt,
            max_attempts = max_attempts,
            error = error,
            "Message broker connection attempt failed"
        );
    }

    pub fn log_broker_retries_exhausted(url: &str, attempts: u32) {
        error!(
            event = "broker_retries_exhausted",
            broker.url = url,
            attempts = attempts,
            "Message broker retries exhausted, exiting"
        );
    }
}
