use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::{AppConfig, StoreBackend};
use crate::models::closet::{ClosetEntry, NewClosetEntry};
use crate::models::job::{InvalidTransition, JobNotice, JobStatus, Transition, TryoutJob};

pub mod memory;
pub mod queries;

pub use memory::MemoryJobStore;
pub use queries::PgJobStore;

/// Capacity of the in-process change-feed fan-out.
pub const NOTICE_BUFFER: usize = 256;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Build the store selected by `STORE_BACKEND`, migrating Postgres first.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn JobStore>, StoreError> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not set".to_string()))?;
            tracing::info!("Connecting to PostgreSQL database");
            let pool = init_pool(url).await?;
            tracing::info!("Running database migrations");
            run_migrations(&pool).await?;
            Ok(Arc::new(PgJobStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-process job store; jobs are not shared between processes");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

/// Durable storage for try-out jobs and closet entries, with a change feed.
///
/// Every status change goes through [`JobStore::apply_transition`], which is a
/// compare-and-swap on the job's current status: it returns `Ok(None)` when the
/// job is missing or has already moved on, and the caller must treat that as
/// having lost the race.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `pending`.
    async fn create_job(&self) -> Result<TryoutJob, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<TryoutJob>, StoreError>;

    /// Atomically move a job from `transition.expected()` to `transition.target()`.
    async fn apply_transition(
        &self,
        id: Uuid,
        transition: &Transition,
    ) -> Result<Option<TryoutJob>, StoreError>;

    /// Jobs in `status`, oldest first, optionally only those created at or after `since`.
    async fn list_by_status(
        &self,
        status: JobStatus,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<TryoutJob>, StoreError>;

    /// Subscribe to insert/update notices. Delivery is best effort.
    fn subscribe(&self) -> broadcast::Receiver<JobNotice>;

    async fn add_closet_entry(&self, entry: &NewClosetEntry) -> Result<ClosetEntry, StoreError>;

    /// Closet entries, newest first.
    async fn list_closet(&self, limit: i64) -> Result<Vec<ClosetEntry>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid job transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Corrupt job row: {0}")]
    Decode(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
