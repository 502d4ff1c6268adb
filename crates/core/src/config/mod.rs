//! 配置管理
//!
//! 默认值 → TOML文件 → `SCHEDULER_` 环境变量，按此顺序合并。

pub mod models;

pub use models::{
    AppConfig, CallbackConfig, DatabaseConfig, MessageQueueConfig, ObservabilityConfig,
    StoreConfig,
};
