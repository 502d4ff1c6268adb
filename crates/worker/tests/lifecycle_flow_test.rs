use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use scheduler_core::{
    config::StoreConfig,
    models::{LogStatus, ScheduleDefinition, ScheduleRecord, StatusReport, TaskOperation},
    traits::{JobHandler, ReportOutcome, ScheduleRepository, StatusReporter},
    Result,
};
use scheduler_dispatcher::RecurringJobStore;
use scheduler_infrastructure::{MetricsCollector, SqliteScheduleRepository};
use scheduler_worker::{ConsumeOutcome, RequestProcessor};
use sqlx::sqlite::SqlitePoolOptions;

struct IdleHandler;

#[async_trait]
impl JobHandler for IdleHandler {
    async fn handle(&self, _record: &ScheduleRecord) -> Result<()> {
        Ok(())
    }
}

struct SilentReporter;

#[async_trait]
impl StatusReporter for SilentReporter {
    async fn report(&self, _callback_url: &str, _report: &StatusReport) -> ReportOutcome {
        ReportOutcome::Delivered
    }
}

#[derive(Default)]
struct RecordingReporter {
    statuses: Mutex<Vec<LogStatus>>,
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(&self, _callback_url: &str, report: &StatusReport) -> ReportOutcome {
        self.statuses.lock().unwrap().push(report.status);
        ReportOutcome::Delivered
    }
}

fn message(cron_expression: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "app": { "name": "shop" },
        "env": {
            "iid": "e1",
            "orgId": "o1",
            "appId": "a1",
            "versionId": "v1",
            "name": "production",
            "version": { "name": "v1" }
        },
        "tasks": [ { "iid": "t1", "name": "nightly", "cronExpression": cron_expression } ]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_deploy_redeploy_delete_environment() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    SqliteScheduleRepository::run_migrations(&pool).await.unwrap();
    let schedules = Arc::new(SqliteScheduleRepository::new(pool));
    let metrics = Arc::new(MetricsCollector::new());

    let store = Arc::new(RecurringJobStore::new(
        schedules.clone(),
        Arc::new(IdleHandler),
        StoreConfig::default(),
        metrics.clone(),
    ));
    store.start().await.unwrap();

    // 另一个环境的调度不受 e1 的删除影响
    schedules
        .replace(&ScheduleRecord::from_definition(
            ScheduleDefinition::new("e10", "t1", "other", "0 0 * * *", None),
            Utc::now() + Duration::hours(1),
        ))
        .await
        .unwrap();

    let processor = RequestProcessor::new(store.clone(), Arc::new(SilentReporter), metrics);

    let outcome = processor
        .process("deploy-tasks-1", TaskOperation::Deploy, &message("0 0 * * *"))
        .await;
    assert!(matches!(outcome, ConsumeOutcome::Processed(ref r) if r.success));
    let record = schedules.get_by_name("e1.t1").await.unwrap().unwrap();
    assert_eq!(record.cron_expression, "0 0 * * *");
    assert!(record.skip_immediate_run);

    let outcome = processor
        .process("redeploy-tasks-2", TaskOperation::Redeploy, &message("0 12 * * *"))
        .await;
    assert!(matches!(outcome, ConsumeOutcome::Processed(ref r) if r.success));
    let record = schedules.get_by_name("e1.t1").await.unwrap().unwrap();
    assert_eq!(record.cron_expression, "0 12 * * *");
    assert_eq!(schedules.count().await.unwrap(), 2);

    let outcome = processor
        .process("delete-tasks-1", TaskOperation::Delete, &message("0 12 * * *"))
        .await;
    assert!(matches!(outcome, ConsumeOutcome::Processed(ref r) if r.success));
    assert!(schedules.get_by_name("e1.t1").await.unwrap().is_none());
    assert!(schedules.get_by_name("e10.t1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_deploy_after_store_stopped_is_reported_as_failure() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    SqliteScheduleRepository::run_migrations(&pool).await.unwrap();
    let schedules = Arc::new(SqliteScheduleRepository::new(pool));
    let metrics = Arc::new(MetricsCollector::new());

    let store = Arc::new(RecurringJobStore::new(
        schedules.clone(),
        Arc::new(IdleHandler),
        StoreConfig::default(),
        metrics.clone(),
    ));
    store.start().await.unwrap();
    store.stop();

    let reporter = Arc::new(RecordingReporter::default());
    let processor = RequestProcessor::new(store, reporter.clone(), metrics);

    let mut body: serde_json::Value = serde_json::from_slice(&message("0 0 * * *")).unwrap();
    body["schedulerCallback"] = serde_json::json!("http://platform.local/callback");
    let outcome = processor
        .process(
            "deploy-tasks-1",
            TaskOperation::Deploy,
            &serde_json::to_vec(&body).unwrap(),
        )
        .await;

    let ConsumeOutcome::Processed(result) = outcome else {
        panic!("expected processed outcome");
    };
    assert!(!result.success);
    assert!(result.error.unwrap().contains("调度存储已停止"));
    assert_eq!(*reporter.statuses.lock().unwrap(), vec![LogStatus::Error]);
    assert_eq!(schedules.count().await.unwrap(), 0);
}
