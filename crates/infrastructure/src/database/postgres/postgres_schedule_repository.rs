use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{ScheduleData, ScheduleRecord},
    traits::ScheduleRepository,
    Result,
};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use tracing::{debug, instrument};

use crate::{
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    schedule_context,
};

const SELECT_COLUMNS: &str = "name, cron_expression, timezone, data, next_run_at, last_run_at, \
     locked_at, last_finished_at, skip_immediate_run, created_at, updated_at";

pub struct PostgresScheduleRepository {
    pool: PgPool,
}

impl PostgresScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建调度表和索引
    pub async fn run_migrations(pool: &PgPool) -> Result<()> {
        debug!("Running PostgreSQL schedule migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                name TEXT PRIMARY KEY,
                cron_expression TEXT NOT NULL,
                timezone TEXT,
                data JSONB NOT NULL,
                next_run_at TIMESTAMPTZ NOT NULL,
                last_run_at TIMESTAMPTZ,
                locked_at TIMESTAMPTZ,
                last_finished_at TIMESTAMPTZ,
                skip_immediate_run BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                schedule_context!(RepositoryOperation::Migrate),
                e,
            )
        })?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_next_run_at ON scheduled_jobs(next_run_at)",
        )
        .execute(pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                schedule_context!(RepositoryOperation::Migrate),
                e,
            )
        })?;

        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Result<ScheduleRecord> {
        let name: String = row.try_get("name")?;
        let Json(data): Json<ScheduleData> = row.try_get("data")?;

        Ok(ScheduleRecord {
            name,
            cron_expression: row.try_get("cron_expression")?,
            timezone: row.try_get("timezone")?,
            data,
            next_run_at: row.try_get("next_run_at")?,
            last_run_at: row.try_get("last_run_at")?,
            locked_at: row.try_get("locked_at")?,
            last_finished_at: row.try_get("last_finished_at")?,
            skip_immediate_run: row.try_get("skip_immediate_run")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduleRepository for PostgresScheduleRepository {
    #[instrument(skip(self))]
    async fn clear_locks(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET locked_at = NULL, last_finished_at = NULL \
             WHERE locked_at IS NOT NULL OR last_finished_at IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                schedule_context!(RepositoryOperation::Update)
                    .with_additional_info("清空锁".to_string()),
                e,
            )
        })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn list_page(&self, limit: i64, offset: i64) -> Result<Vec<ScheduleRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_jobs ORDER BY name LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    schedule_context!(RepositoryOperation::Read),
                    e,
                )
            })?;

        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn get_by_name(&self, name: &str) -> Result<Option<ScheduleRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM scheduled_jobs WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    schedule_context!(RepositoryOperation::Read, name = name),
                    e,
                )
            })?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    #[instrument(skip(self, record), fields(name = %record.name))]
    async fn replace(&self, record: &ScheduleRecord) -> Result<()> {
        let context = schedule_context!(RepositoryOperation::Create, name = record.name);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(context.clone(), e))?;

        sqlx::query("DELETE FROM scheduled_jobs WHERE name = $1")
            .bind(&record.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(context.clone(), e))?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (name, cron_expression, timezone, data, next_run_at,
                last_run_at, locked_at, last_finished_at, skip_immediate_run, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&record.name)
        .bind(&record.cron_expression)
        .bind(&record.timezone)
        .bind(Json(&record.data))
        .bind(record.next_run_at)
        .bind(record.last_run_at)
        .bind(record.locked_at)
        .bind(record.last_finished_at)
        .bind(record.skip_immediate_run)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(context.clone(), e))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(context.clone(), e))?;

        RepositoryErrorHelpers::log_operation_success(&context, None);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_name(&self, name: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    schedule_context!(RepositoryOperation::Delete, name = name),
                    e,
                )
            })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE starts_with(name, $1)")
            .bind(prefix)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    schedule_context!(RepositoryOperation::Delete)
                        .with_additional_info(format!("前缀 '{prefix}'")),
                    e,
                )
            })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn update_next_run(&self, name: &str, next_run_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET next_run_at = $1, updated_at = $2 WHERE name = $3")
            .bind(next_run_at)
            .bind(Utc::now())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    schedule_context!(RepositoryOperation::Update, name = name),
                    e,
                )
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        lock_expired_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduleRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_jobs \
             WHERE next_run_at <= $1 AND (locked_at IS NULL OR locked_at < $2) \
             ORDER BY next_run_at LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(lock_expired_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    schedule_context!(RepositoryOperation::Read)
                        .with_additional_info("到期调度".to_string()),
                    e,
                )
            })?;

        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn try_lock(
        &self,
        name: &str,
        now: DateTime<Utc>,
        lock_expired_before: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET locked_at = $1, updated_at = $2 \
             WHERE name = $3 AND (locked_at IS NULL OR locked_at < $4)",
        )
        .bind(now)
        .bind(now)
        .bind(name)
        .bind(lock_expired_before)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                schedule_context!(RepositoryOperation::Lock, name = name),
                e,
            )
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn complete_run(
        &self,
        name: &str,
        locked_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET locked_at = NULL, last_run_at = $1, last_finished_at = $2, \
             next_run_at = $3, updated_at = $4 WHERE name = $5 AND locked_at = $6",
        )
        .bind(locked_at)
        .bind(finished_at)
        .bind(next_run_at)
        .bind(finished_at)
        .bind(name)
        .bind(locked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::database_error(
                schedule_context!(RepositoryOperation::Update, name = name),
                e,
            )
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM scheduled_jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::database_error(
                    schedule_context!(RepositoryOperation::Read),
                    e,
                )
            })?;

        Ok(row.try_get("total")?)
    }
}
