pub mod message;
pub mod operation_log;
pub mod request;
pub mod schedule;
pub mod tracking;

pub use message::DispatchMessage;
pub use operation_log::{LogEntry, LogStatus, OperationLog, StatusReport};
pub use request::{
    AppRef, EnvironmentRef, EnvironmentRequest, TaskBatchRequest, TaskOperation, TaskRequest,
    TaskSpec, VersionRef,
};
pub use schedule::{
    environment_prefix, schedule_name, ScheduleData, ScheduleDefinition, ScheduleRecord,
};
pub use tracking::{TrackingEntry, TrackingStatus};
