use async_trait::async_trait;
use scheduler_core::{
    models::{TrackingEntry, TrackingStatus},
    traits::TrackingRepository,
    Result, SchedulerError,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use crate::{
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    schedule_context,
};

pub struct SqliteTrackingRepository {
    pool: SqlitePool,
}

impl SqliteTrackingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        debug!("Running SQLite tracking migrations");

        for statement in [
            r#"
            CREATE TABLE IF NOT EXISTS cron_job_tracking (
                tracking_id TEXT PRIMARY KEY,
                env_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                triggered_at DATETIME NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_cron_job_tracking_env_id ON cron_job_tracking(env_id)",
        ] {
            sqlx::query(statement).execute(pool).await.map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    schedule_context!(RepositoryOperation::Migrate),
                    e,
                )
            })?;
        }

        Ok(())
    }

    fn row_to_entry(row: &SqliteRow) -> Result<TrackingEntry> {
        let status: String = row.try_get("status")?;
        Ok(TrackingEntry {
            tracking_id: row.try_get("tracking_id")?,
            task_id: row.try_get("task_id")?,
            task_name: row.try_get("task_name")?,
            triggered_at: row.try_get("triggered_at")?,
            status: status
                .parse::<TrackingStatus>()
                .map_err(SchedulerError::DatabaseOperation)?,
        })
    }
}

#[async_trait]
impl TrackingRepository for SqliteTrackingRepository {
    #[instrument(skip(self, entry), fields(tracking_id = %entry.tracking_id))]
    async fn insert(&self, env_id: &str, entry: &TrackingEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO cron_job_tracking (tracking_id, env_id, task_id, task_name, triggered_at, status) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.tracking_id)
        .bind(env_id)
        .bind(&entry.task_id)
        .bind(&entry.task_name)
        .bind(entry.triggered_at)
        .bind(entry.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                schedule_context!(RepositoryOperation::Create, env_id = env_id)
                    .with_additional_info(format!("trackingId {}", entry.tracking_id)),
                e,
            )
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_by_env(&self, env_id: &str) -> Result<Vec<TrackingEntry>> {
        let rows = sqlx::query(
            "SELECT tracking_id, task_id, task_name, triggered_at, status \
             FROM cron_job_tracking WHERE env_id = ? ORDER BY triggered_at",
        )
        .bind(env_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                schedule_context!(RepositoryOperation::Read, env_id = env_id),
                e,
            )
        })?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}
