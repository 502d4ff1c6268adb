pub mod callback;
pub mod consumer;
pub mod task_manager;

pub use callback::HttpStatusReporter;
pub use consumer::{ConsumeOutcome, QueueConsumers, RequestProcessor};
pub use task_manager::{OperationResult, TaskManager};
