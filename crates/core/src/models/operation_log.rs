use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 操作日志条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStatus {
    #[serde(rename = "OK")]
    Ok,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Ok => "OK",
            LogStatus::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub started_at: DateTime<Utc>,
    /// 距上一条日志的毫秒数，第一条为0
    pub duration: i64,
    pub status: LogStatus,
    pub message: String,
}

/// 单次生命周期操作的内存日志，只作为回调报告的载荷，不持久化
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
    prev: Option<DateTime<Utc>>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: impl Into<String>, status: LogStatus) -> &LogEntry {
        self.add_at(message, status, Utc::now())
    }

    pub fn add_at(
        &mut self,
        message: impl Into<String>,
        status: LogStatus,
        at: DateTime<Utc>,
    ) -> &LogEntry {
        let message = message.into();
        let duration = self
            .prev
            .map(|prev| (at - prev).num_milliseconds())
            .unwrap_or(0);

        info!("{} ({}ms)", message, duration);

        self.prev = Some(at);
        self.entries.push(LogEntry {
            started_at: at,
            duration,
            status,
            message,
        });
        // 刚刚 push 过，不会为空
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 发往 schedulerCallback 的状态报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: LogStatus,
    pub logs: Vec<LogEntry>,
}
