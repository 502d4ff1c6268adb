use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的时区: {0}")]
    InvalidTimezone(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("消息队列重连次数已耗尽: 共尝试 {attempts} 次")]
    BrokerRetriesExhausted { attempts: u32 },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("无效的消息: {0}")]
    InvalidMessage(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("调度存储已停止，拒绝操作: {0}")]
    StoreStopped(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 稳定的错误类别名称，用于结构化日志和操作日志
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DatabaseError",
            SchedulerError::DatabaseOperation(_) => "DatabaseOperationError",
            SchedulerError::InvalidCron { .. } => "InvalidCronError",
            SchedulerError::InvalidTimezone(_) => "InvalidTimezoneError",
            SchedulerError::MessageQueue(_) => "MessageQueueError",
            SchedulerError::BrokerRetriesExhausted { .. } => "BrokerRetriesExhaustedError",
            SchedulerError::Serialization(_) => "SerializationError",
            SchedulerError::InvalidMessage(_) => "InvalidMessageError",
            SchedulerError::Configuration(_) => "ConfigurationError",
            SchedulerError::Network(_) => "NetworkError",
            SchedulerError::StoreStopped(_) => "StoreStoppedError",
            SchedulerError::Internal(_) => "InternalError",
        }
    }

    /// 错误来源链，从最外层的 source 开始，每行一个
    pub fn source_chain(&self) -> String {
        let mut chain = Vec::new();
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain.join("\n")
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
