//! Metrics collector for the cron scheduler
//!
//! 指标通过 `metrics` 门面记录，进程内未安装 recorder 时所有调用都是空操作。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{counter, histogram, Counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metrics collector for the cron scheduler
pub struct MetricsCollector {
    // Recurring job store
    schedule_firings_total: Counter,
    schedule_fire_failures_total: Counter,
    schedules_rehydrated_total: Counter,

    // Dispatch
    dispatch_published_total: Counter,
    dispatch_dropped_total: Counter,

    // Lifecycle operations，按 operation/status 标签动态注册
    callbacks_dropped_total: Counter,
    messages_rejected_total: Counter,

    // Broker
    broker_connect_attempts_total: Counter,
    broker_connect_failures_total: Counter,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            schedule_firings_total: counter!("scheduler_schedule_firings_total"),
            schedule_fire_failures_total: counter!("scheduler_schedule_fire_failures_total"),
            schedules_rehydrated_total: counter!("scheduler_schedules_rehydrated_total"),
            dispatch_published_total: counter!("scheduler_dispatch_published_total"),
            dispatch_dropped_total: counter!("scheduler_dispatch_dropped_total"),
            callbacks_dropped_total: counter!("scheduler_callbacks_dropped_total"),
            messages_rejected_total: counter!("scheduler_messages_rejected_total"),
            broker_connect_attempts_total: counter!("scheduler_broker_connect_attempts_total"),
            broker_connect_failures_total: counter!("scheduler_broker_connect_failures_total"),
        }
    }

    pub fn record_schedule_fired(&self, success: bool) {
        self.schedule_firings_total.increment(1);
        if !success {
            self.schedule_fire_failures_total.increment(1);
        }
    }

    pub fn record_schedules_rehydrated(&self, count: u64) {
        self.schedules_rehydrated_total.increment(count);
    }

    pub fn record_dispatch(&self, published: bool) {
        if published {
            self.dispatch_published_total.increment(1);
        } else {
            self.dispatch_dropped_total.increment(1);
        }
    }

    /// Record a completed lifecycle operation (deploy / redeploy / undeploy / delete)
    pub fn record_lifecycle_operation(
        &self,
        operation: &'static str,
        success: bool,
        duration_seconds: f64,
    ) {
        let status = if success { "success" } else { "failure" };
        counter!(
            "scheduler_lifecycle_operations_total",
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        histogram!(
            "scheduler_lifecycle_operation_duration_seconds",
            "operation" => operation
        )
        .record(duration_seconds);
    }

    pub fn record_callback_dropped(&self) {
        self.callbacks_dropped_total.increment(1);
    }

    pub fn record_message_rejected(&self) {
        self.messages_rejected_total.increment(1);
    }

    pub fn record_broker_connect_attempt(&self, success: bool) {
        self.broker_connect_attempts_total.increment(1);
        if !success {
            self.broker_connect_failures_total.increment(1);
        }
    }
}

/// 安装 Prometheus exporter，在 `bind_address` 上暴露 `/metrics`
///
/// 需要在 tokio 运行时内调用。
pub fn install_prometheus_exporter(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus exporter失败")?;

    info!("Prometheus指标已暴露在 {}", addr);
    Ok(())
}
