use serde::{Deserialize, Serialize};

/// 发布到 `process-task-{envId}-{shard}` 队列的分发消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub task_id: String,
    pub env_id: String,
    pub task_name: String,
    /// 触发时生成，仅用于关联跟踪记录，不作去重
    pub tracking_id: String,
}

impl DispatchMessage {
    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
