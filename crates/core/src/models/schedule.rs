use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 调度记录携带的业务数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleData {
    pub env_id: String,
    pub task_id: String,
    pub task_name: String,
}

/// 注册调度时的输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDefinition {
    pub name: String,
    pub cron_expression: String,
    /// IANA 时区名，None 表示 UTC
    pub timezone: Option<String>,
    pub data: ScheduleData,
}

impl ScheduleDefinition {
    pub fn new(
        env_id: &str,
        task_id: &str,
        task_name: &str,
        cron_expression: &str,
        timezone: Option<&str>,
    ) -> Self {
        Self {
            name: schedule_name(env_id, task_id),
            cron_expression: cron_expression.to_string(),
            timezone: timezone.map(str::to_string),
            data: ScheduleData {
                env_id: env_id.to_string(),
                task_id: task_id.to_string(),
                task_name: task_name.to_string(),
            },
        }
    }
}

/// 持久化的调度记录
///
/// `name` 全局唯一，格式为 `{envId}.{taskId}`，通过 envId 前缀即可找到某个环境的全部调度。
/// `locked_at` / `last_finished_at` 是调度器运行时的簿记字段，启动时必须清空。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub name: String,
    pub cron_expression: String,
    pub timezone: Option<String>,
    pub data: ScheduleData,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub skip_immediate_run: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleRecord {
    /// 由定义创建新记录，首次执行时间由调用方按 cron 计算后传入
    pub fn from_definition(definition: ScheduleDefinition, next_run_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            name: definition.name,
            cron_expression: definition.cron_expression,
            timezone: definition.timezone,
            data: definition.data,
            next_run_at,
            last_run_at: None,
            locked_at: None,
            last_finished_at: None,
            skip_immediate_run: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }
}

/// 调度名: `{envId}.{taskId}`
pub fn schedule_name(env_id: &str, task_id: &str) -> String {
    format!("{env_id}.{task_id}")
}

/// 某个环境下所有调度名的公共前缀
pub fn environment_prefix(env_id: &str) -> String {
    format!("{env_id}.")
}
