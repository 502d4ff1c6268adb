//! 入站队列消息体
//!
//! 消费端在进入生命周期管理器之前先把消息解析成带标签的 [`TaskRequest`] 并校验。

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SchedulerError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRef {
    pub iid: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: VersionRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub iid: String,
    #[serde(default)]
    pub name: String,
    pub cron_expression: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// deploy / redeploy / undeploy 消息体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBatchRequest {
    #[serde(default)]
    pub app: AppRef,
    pub env: EnvironmentRef,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub scheduler_callback: Option<String>,
}

/// delete 消息体，没有任务列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRequest {
    #[serde(default)]
    pub app: AppRef,
    pub env: EnvironmentRef,
    #[serde(default)]
    pub scheduler_callback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOperation {
    Deploy,
    Redeploy,
    Undeploy,
    Delete,
}

impl TaskOperation {
    pub const ALL: [TaskOperation; 4] = [
        TaskOperation::Deploy,
        TaskOperation::Redeploy,
        TaskOperation::Undeploy,
        TaskOperation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOperation::Deploy => "deploy",
            TaskOperation::Redeploy => "redeploy",
            TaskOperation::Undeploy => "undeploy",
            TaskOperation::Delete => "delete",
        }
    }

    /// 入站队列名前缀，完整队列名为 `{prefix}-{shard}{suffix}`
    pub fn queue_prefix(&self) -> String {
        format!("{}-tasks", self.as_str())
    }
}

impl std::fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRequest {
    Deploy(TaskBatchRequest),
    Redeploy(TaskBatchRequest),
    Undeploy(TaskBatchRequest),
    Delete(EnvironmentRequest),
}

impl TaskRequest {
    /// 按队列对应的操作解析并校验消息体
    pub fn parse(operation: TaskOperation, body: &[u8]) -> Result<Self> {
        let request = match operation {
            TaskOperation::Deploy => TaskRequest::Deploy(Self::parse_body(body)?),
            TaskOperation::Redeploy => TaskRequest::Redeploy(Self::parse_body(body)?),
            TaskOperation::Undeploy => TaskRequest::Undeploy(Self::parse_body(body)?),
            TaskOperation::Delete => TaskRequest::Delete(Self::parse_body(body)?),
        };
        request.validate()?;
        Ok(request)
    }

    fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
        serde_json::from_slice(body)
            .map_err(|e| SchedulerError::InvalidMessage(format!("消息体解析失败: {e}")))
    }

    fn validate(&self) -> Result<()> {
        validate_identifier("env.iid", &self.env().iid)?;

        for task in self.tasks() {
            validate_identifier("task.iid", &task.iid)?;
            if task.cron_expression.trim().is_empty() {
                return Err(SchedulerError::InvalidMessage(format!(
                    "任务 {} 缺少 cronExpression",
                    task.iid
                )));
            }
        }

        if let Some(callback) = self.callback() {
            if !callback.starts_with("http://") && !callback.starts_with("https://") {
                return Err(SchedulerError::InvalidMessage(format!(
                    "无效的回调地址: {callback}"
                )));
            }
        }

        Ok(())
    }

    pub fn operation(&self) -> TaskOperation {
        match self {
            TaskRequest::Deploy(_) => TaskOperation::Deploy,
            TaskRequest::Redeploy(_) => TaskOperation::Redeploy,
            TaskRequest::Undeploy(_) => TaskOperation::Undeploy,
            TaskRequest::Delete(_) => TaskOperation::Delete,
        }
    }

    pub fn app(&self) -> &AppRef {
        match self {
            TaskRequest::Deploy(r) | TaskRequest::Redeploy(r) | TaskRequest::Undeploy(r) => &r.app,
            TaskRequest::Delete(r) => &r.app,
        }
    }

    pub fn env(&self) -> &EnvironmentRef {
        match self {
            TaskRequest::Deploy(r) | TaskRequest::Redeploy(r) | TaskRequest::Undeploy(r) => &r.env,
            TaskRequest::Delete(r) => &r.env,
        }
    }

    /// delete 请求没有任务列表，返回空切片
    pub fn tasks(&self) -> &[TaskSpec] {
        match self {
            TaskRequest::Deploy(r) | TaskRequest::Redeploy(r) | TaskRequest::Undeploy(r) => {
                &r.tasks
            }
            TaskRequest::Delete(_) => &[],
        }
    }

    pub fn callback(&self) -> Option<&str> {
        let callback = match self {
            TaskRequest::Deploy(r) | TaskRequest::Redeploy(r) | TaskRequest::Undeploy(r) => {
                &r.scheduler_callback
            }
            TaskRequest::Delete(r) => &r.scheduler_callback,
        };
        callback.as_deref().filter(|url| !url.is_empty())
    }
}

// 调度名以 `{envId}.{taskId}` 拼接，id 中出现 '.' 会破坏环境前缀归属
fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SchedulerError::InvalidMessage(format!("{field} 不能为空")));
    }
    if value.contains('.') {
        return Err(SchedulerError::InvalidMessage(format!(
            "{field} 不能包含 '.': {value}"
        )));
    }
    Ok(())
}
