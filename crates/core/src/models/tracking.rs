use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 跟踪记录状态。触发时写入 Pending，终态由执行端写入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    Pending,
    Completed,
    Failed,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Pending => "pending",
            TrackingStatus::Completed => "completed",
            TrackingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TrackingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TrackingStatus::Pending),
            "completed" => Ok(TrackingStatus::Completed),
            "failed" => Ok(TrackingStatus::Failed),
            other => Err(format!("未知的跟踪状态: {other}")),
        }
    }
}

/// 每次触发写入的跟踪记录，按 trackingId 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEntry {
    pub tracking_id: String,
    pub task_id: String,
    pub task_name: String,
    pub triggered_at: DateTime<Utc>,
    pub status: TrackingStatus,
}

impl TrackingEntry {
    /// 新建一条 pending 记录，并生成新的 trackingId
    pub fn pending(task_id: &str, task_name: &str) -> Self {
        Self {
            tracking_id: Uuid::new_v4().simple().to_string(),
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            triggered_at: Utc::now(),
            status: TrackingStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_entries_get_fresh_ids() {
        let a = TrackingEntry::pending("t1", "nightly");
        let b = TrackingEntry::pending("t1", "nightly");
        assert_ne!(a.tracking_id, b.tracking_id);
        assert_eq!(a.status, TrackingStatus::Pending);
        assert_eq!(serde_json::to_value(a.status).unwrap(), "pending");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("failed".parse::<TrackingStatus>().unwrap(), TrackingStatus::Failed);
        assert!("unknown".parse::<TrackingStatus>().is_err());
    }
}
