//! Error handling for repository operations with schedule context
//!
//! 把 sqlx 错误转换成带上下文的 [`SchedulerError`]，并在转换时记录结构化日志。

use scheduler_core::SchedulerError;
use sqlx::Error as SqlxError;
use std::fmt;
use tracing::{debug, error};

/// Operation context for repository operations
#[derive(Debug, Clone)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Lock,
    Migrate,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Lock => write!(f, "锁定"),
            RepositoryOperation::Migrate => write!(f, "迁移"),
        }
    }
}

/// Context information for schedule / tracking repository operations
#[derive(Debug, Clone)]
pub struct ScheduleOperationContext {
    pub operation: RepositoryOperation,
    pub schedule_name: Option<String>,
    pub env_id: Option<String>,
    pub additional_info: Option<String>,
}

impl ScheduleOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            schedule_name: None,
            env_id: None,
            additional_info: None,
        }
    }

    pub fn with_schedule_name(mut self, name: String) -> Self {
        self.schedule_name = Some(name);
        self
    }

    pub fn with_env_id(mut self, env_id: String) -> Self {
        self.env_id = Some(env_id);
        self
    }

    pub fn with_additional_info(mut self, info: String) -> Self {
        self.additional_info = Some(info);
        self
    }

    pub fn entity_description(&self) -> String {
        match (&self.schedule_name, &self.env_id) {
            (Some(name), _) => format!("调度 '{name}'"),
            (None, Some(env_id)) => format!("环境 '{env_id}' 的记录"),
            (None, None) => "调度记录".to_string(),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    /// Create a database error with schedule context
    pub fn database_error(context: ScheduleOperationContext, error: SqlxError) -> SchedulerError {
        let entity_desc = context.entity_description();
        let operation_desc = context.operation.to_string();

        let error_msg = match &error {
            SqlxError::Database(db_error) => match db_error.constraint() {
                Some(constraint) => format!(
                    "{operation_desc}{entity_desc}时发生数据库约束冲突: {constraint}"
                ),
                None if db_error.is_unique_violation() => {
                    format!("{operation_desc}{entity_desc}时发生唯一约束冲突: {db_error}")
                }
                None => format!("{operation_desc}{entity_desc}时发生数据库错误: {db_error}"),
            },
            SqlxError::PoolClosed => format!("{operation_desc}{entity_desc}时数据库连接池已关闭"),
            SqlxError::PoolTimedOut => format!("{operation_desc}{entity_desc}时数据库连接池超时"),
            SqlxError::Io(io_error) => {
                format!("{operation_desc}{entity_desc}时发生I/O错误: {io_error}")
            }
            _ => format!("{operation_desc}{entity_desc}时发生未知数据库错误: {error}"),
        };

        let error_msg = match &context.additional_info {
            Some(info) => format!("{error_msg} ({info})"),
            None => error_msg,
        };

        error!(error = %error, "{}", error_msg);
        SchedulerError::DatabaseOperation(error_msg)
    }

    /// Create a serialization error with schedule context
    pub fn serialization_error(
        context: ScheduleOperationContext,
        error: serde_json::Error,
    ) -> SchedulerError {
        let error_msg = format!(
            "{}{}时序列化失败: {}",
            context.operation,
            context.entity_description(),
            error
        );
        error!(error = %error, "{}", error_msg);
        SchedulerError::Serialization(error_msg)
    }

    pub fn log_operation_success(context: &ScheduleOperationContext, details: Option<&str>) {
        match details {
            Some(details) => debug!(
                "{}{}成功: {}",
                context.operation,
                context.entity_description(),
                details
            ),
            None => debug!("{}{}成功", context.operation, context.entity_description()),
        }
    }
}

/// Macro for creating schedule operation context easily
#[macro_export]
macro_rules! schedule_context {
    ($operation:expr) => {
        $crate::error_handling::ScheduleOperationContext::new($operation)
    };
    ($operation:expr, name = $name:expr) => {
        $crate::error_handling::ScheduleOperationContext::new($operation)
            .with_schedule_name($name.to_string())
    };
    ($operation:expr, env_id = $env_id:expr) => {
        $crate::error_handling::ScheduleOperationContext::new($operation)
            .with_env_id($env_id.to_string())
    };
}
