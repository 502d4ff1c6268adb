pub mod message_queue;
pub mod reporter;
pub mod repository;
pub mod scheduler;

pub use message_queue::MessagePublisher;
pub use reporter::{ReportOutcome, StatusReporter};
pub use repository::{ScheduleRepository, TrackingRepository};
pub use scheduler::{JobHandler, ScheduleRegistry};
