pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use models::{
    DispatchMessage, LogEntry, LogStatus, OperationLog, ScheduleData, ScheduleDefinition,
    ScheduleRecord, StatusReport, TaskOperation, TaskRequest, TrackingEntry, TrackingStatus,
};
pub use traits::{
    JobHandler, MessagePublisher, ReportOutcome, ScheduleRegistry, ScheduleRepository,
    StatusReporter, TrackingRepository,
};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
