pub mod database;
pub mod error_handling;
pub mod in_memory_queue;
pub mod message_queue;
pub mod observability;

pub use database::*;
pub use in_memory_queue::InMemoryPublisher;
pub use message_queue::*;
pub use observability::*;
