use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{
    config::DatabaseConfig,
    traits::{ScheduleRepository, TrackingRepository},
    Result,
};
use tracing::info;

use super::postgres::{PostgresScheduleRepository, PostgresTrackingRepository};
use super::sqlite::{SqliteScheduleRepository, SqliteTrackingRepository};

/// Database type detection
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// Database connection pool enum
#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    /// Create pool from config with automatic type detection
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let acquire_timeout = Duration::from_secs(config.connection_timeout_seconds);

        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// 统一的数据库管理器，负责建表并按数据库类型构造仓库
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = DatabasePool::new(config).await?;
        Ok(Self { pool })
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    /// 创建调度表和跟踪表，可重复执行
    pub async fn migrate(&self) -> Result<()> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                PostgresScheduleRepository::run_migrations(pool).await?;
                PostgresTrackingRepository::run_migrations(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                SqliteScheduleRepository::run_migrations(pool).await?;
                SqliteTrackingRepository::run_migrations(pool).await?;
            }
        }
        info!("数据库迁移完成: {:?}", self.database_type());
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn schedule_repository(&self) -> Arc<dyn ScheduleRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresScheduleRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteScheduleRepository::new(pool.clone())),
        }
    }

    pub fn tracking_repository(&self) -> Arc<dyn TrackingRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresTrackingRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteTrackingRepository::new(pool.clone())),
        }
    }
}
