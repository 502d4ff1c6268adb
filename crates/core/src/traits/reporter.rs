use async_trait::async_trait;

use crate::models::StatusReport;

/// 回调报告的结果。失败只记录，不会传播给调用方
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered,
    Dropped { reason: String },
}

impl ReportOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ReportOutcome::Delivered)
    }
}

/// 把操作日志报告给平台
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, callback_url: &str, report: &StatusReport) -> ReportOutcome;
}
