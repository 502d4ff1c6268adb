use std::sync::Arc;

use chrono::{Duration, Utc};
use scheduler_core::{
    config::{MessageQueueConfig, StoreConfig},
    models::{DispatchMessage, ScheduleDefinition, TrackingStatus},
    traits::{ScheduleRegistry, ScheduleRepository, TrackingRepository},
};
use scheduler_dispatcher::{RecurringJobStore, TaskFireHandler};
use scheduler_infrastructure::{
    InMemoryPublisher, MetricsCollector, SqliteScheduleRepository, SqliteTrackingRepository,
};
use sqlx::sqlite::SqlitePoolOptions;

#[tokio::test]
async fn test_due_schedule_is_tracked_and_dispatched() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    SqliteScheduleRepository::run_migrations(&pool).await.unwrap();
    SqliteTrackingRepository::run_migrations(&pool).await.unwrap();

    let schedules = Arc::new(SqliteScheduleRepository::new(pool.clone()));
    let tracking = Arc::new(SqliteTrackingRepository::new(pool.clone()));
    let publisher = Arc::new(InMemoryPublisher::new());
    let metrics = Arc::new(MetricsCollector::new());

    let queue_config = MessageQueueConfig {
        task_process_queue_count: 1,
        ..Default::default()
    };
    let fire_handler = Arc::new(TaskFireHandler::new(
        tracking.clone(),
        publisher.clone(),
        queue_config,
        metrics.clone(),
    ));
    let store = RecurringJobStore::new(
        schedules.clone(),
        fire_handler,
        StoreConfig::default(),
        metrics,
    );
    store.start().await.unwrap();

    store
        .register_schedule(ScheduleDefinition::new(
            "e1",
            "t1",
            "nightly",
            "0 0 * * *",
            Some("Europe/Istanbul"),
        ))
        .await
        .unwrap();
    schedules
        .update_next_run("e1.t1", Utc::now() - Duration::seconds(1))
        .await
        .unwrap();

    assert_eq!(store.process_due_jobs().await.unwrap(), 1);

    let messages = publisher.messages("process-task-e1-1").await;
    assert_eq!(messages.len(), 1);
    let message = DispatchMessage::deserialize_bytes(&messages[0]).unwrap();
    assert_eq!(message.env_id, "e1");
    assert_eq!(message.task_id, "t1");
    assert_eq!(message.task_name, "nightly");

    let entries = tracking.list_by_env("e1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tracking_id, message.tracking_id);
    assert_eq!(entries[0].status, TrackingStatus::Pending);

    let record = schedules.get_by_name("e1.t1").await.unwrap().unwrap();
    assert_eq!(record.timezone.as_deref(), Some("Europe/Istanbul"));
    assert!(record.next_run_at > Utc::now());
}
