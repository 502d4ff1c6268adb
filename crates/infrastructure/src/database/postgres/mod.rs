pub mod postgres_schedule_repository;
pub mod postgres_tracking_repository;

pub use postgres_schedule_repository::PostgresScheduleRepository;
pub use postgres_tracking_repository::PostgresTrackingRepository;
