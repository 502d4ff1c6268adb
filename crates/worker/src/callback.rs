use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use scheduler_core::{
    config::CallbackConfig,
    models::StatusReport,
    traits::{ReportOutcome, StatusReporter},
    Result, SchedulerError,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

/// 通过 HTTP POST 把操作日志报告给平台，失败只记录日志，不重试
pub struct HttpStatusReporter {
    http_client: reqwest::Client,
    master_token: String,
    metrics: Arc<MetricsCollector>,
}

impl HttpStatusReporter {
    pub fn new(config: &CallbackConfig, metrics: Arc<MetricsCollector>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            http_client,
            master_token: config.master_token.clone(),
            metrics,
        })
    }

    fn dropped(&self, url: &str, reason: String) -> ReportOutcome {
        self.metrics.record_callback_dropped();
        StructuredLogger::log_callback_dropped(url, &reason);
        ReportOutcome::Dropped { reason }
    }
}

#[async_trait]
impl StatusReporter for HttpStatusReporter {
    async fn report(&self, callback_url: &str, report: &StatusReport) -> ReportOutcome {
        let response = self
            .http_client
            .post(callback_url)
            .header(AUTHORIZATION, self.master_token.as_str())
            .header(CONTENT_TYPE, "application/json")
            .json(report)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                debug!("状态报告已发送到 {}", callback_url);
                ReportOutcome::Delivered
            }
            Ok(response) => self.dropped(callback_url, format!("HTTP {}", response.status())),
            Err(e) => self.dropped(callback_url, e.to_string()),
        }
    }
}
