pub mod sqlite_schedule_repository;
pub mod sqlite_tracking_repository;

pub use sqlite_schedule_repository::SqliteScheduleRepository;
pub use sqlite_tracking_repository::SqliteTrackingRepository;
