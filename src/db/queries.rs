use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{JobStore, StoreError, NOTICE_BUFFER};
use crate::models::closet::{ClosetEntry, NewClosetEntry};
use crate::models::job::{JobNotice, JobStatus, Transition, TryoutJob};

/// Channel the `tryout_jobs_notify` trigger publishes on.
pub const NOTIFY_CHANNEL: &str = "tryout_jobs";

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

const JOB_COLUMNS: &str = "id, status, clothing_url, clothing_image_url, user_photo_url, \
                           result_image_url, error_message, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    clothing_url: Option<String>,
    clothing_image_url: Option<String>,
    user_photo_url: Option<String>,
    result_image_url: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for TryoutJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status)
            .map_err(|_| StoreError::Decode(format!("unknown status '{}'", row.status)))?;
        Ok(TryoutJob {
            id: row.id,
            status,
            clothing_url: row.clothing_url,
            clothing_image_url: row.clothing_image_url,
            user_photo_url: row.user_photo_url,
            result_image_url: row.result_image_url,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed job store. Push notices come from LISTEN/NOTIFY.
pub struct PgJobStore {
    pool: PgPool,
    notices: broadcast::Sender<JobNotice>,
    listener: JoinHandle<()>,
}

impl PgJobStore {
    /// Wrap a pool and start the change-feed listener task.
    pub fn new(pool: PgPool) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        let listener = tokio::spawn(listen_for_changes(pool.clone(), notices.clone()));
        Self {
            pool,
            notices,
            listener,
        }
    }
}

impl Drop for PgJobStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Forward `pg_notify` payloads to in-process subscribers, reconnecting on failure.
async fn listen_for_changes(pool: PgPool, notices: broadcast::Sender<JobNotice>) {
    loop {
        match PgListener::connect_with(&pool).await {
            Ok(mut listener) => {
                if let Err(e) = listener.listen(NOTIFY_CHANNEL).await {
                    tracing::warn!(error = %e, "Failed to LISTEN on job channel");
                } else {
                    tracing::info!(channel = NOTIFY_CHANNEL, "Listening for job changes");
                    loop {
                        match listener.recv().await {
                            Ok(notification) => {
                                match serde_json::from_str::<JobNotice>(notification.payload()) {
                                    Ok(notice) => {
                                        // No receivers is fine; pollers still cover it.
                                        let _ = notices.send(notice);
                                    }
                                    Err(e) => tracing::warn!(
                                        error = %e,
                                        payload = notification.payload(),
                                        "Ignoring malformed job notice"
                                    ),
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Job change feed dropped");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to connect job change listener"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self) -> Result<TryoutJob, StoreError> {
        let row: JobRow = sqlx::query_as(&format!(
            "INSERT INTO tryout_jobs (status) VALUES ('pending') RETURNING {JOB_COLUMNS}"
        ))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<TryoutJob>, StoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM tryout_jobs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(TryoutJob::try_from).transpose()
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        transition: &Transition,
    ) -> Result<Option<TryoutJob>, StoreError> {
        transition.validate()?;

        let row: Option<JobRow> = match transition {
            Transition::ClothingResolved {
                clothing_url,
                clothing_image_url,
            } => {
                sqlx::query_as(&format!(
                    r#"
                    UPDATE tryout_jobs
                    SET status = 'waiting_photo',
                        clothing_url = $2,
                        clothing_image_url = $3,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'pending'
                    RETURNING {JOB_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(clothing_url.as_deref())
                .bind(clothing_image_url)
                .fetch_optional(&self.pool)
                .await?
            }
            Transition::Claimed { user_photo_url } => {
                sqlx::query_as(&format!(
                    r#"
                    UPDATE tryout_jobs
                    SET status = 'processing',
                        user_photo_url = $2,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'waiting_photo' AND user_photo_url IS NULL
                    RETURNING {JOB_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(user_photo_url)
                .fetch_optional(&self.pool)
                .await?
            }
            Transition::Completed { result_image_url } => {
                sqlx::query_as(&format!(
                    r#"
                    UPDATE tryout_jobs
                    SET status = 'completed',
                        result_image_url = $2,
                        error_message = NULL,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'processing'
                    RETURNING {JOB_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(result_image_url)
                .fetch_optional(&self.pool)
                .await?
            }
            Transition::Failed {
                from,
                error_message,
            } => {
                sqlx::query_as(&format!(
                    r#"
                    UPDATE tryout_jobs
                    SET status = 'failed',
                        error_message = $2,
                        result_image_url = NULL,
                        updated_at = NOW()
                    WHERE id = $1 AND status = $3
                    RETURNING {JOB_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(error_message)
                .bind(from.as_ref())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(TryoutJob::try_from).transpose()
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<TryoutJob>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM tryout_jobs
            WHERE status = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#
        ))
        .bind(status.as_ref())
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryoutJob::try_from).collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<JobNotice> {
        self.notices.subscribe()
    }

    async fn add_closet_entry(&self, entry: &NewClosetEntry) -> Result<ClosetEntry, StoreError> {
        let row = sqlx::query_as::<_, ClosetEntry>(
            r#"
            INSERT INTO closet_entries (job_id, clothing_url, clothing_image_url, result_image_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id, job_id, clothing_url, clothing_image_url, result_image_url, created_at
            "#,
        )
        .bind(entry.job_id)
        .bind(entry.clothing_url.as_deref())
        .bind(entry.clothing_image_url.as_deref())
        .bind(&entry.result_image_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_closet(&self, limit: i64) -> Result<Vec<ClosetEntry>, StoreError> {
        let rows = sqlx::query_as::<_, ClosetEntry>(
            r#"
            SELECT id, job_id, clothing_url, clothing_image_url, result_image_url, created_at
            FROM closet_entries
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
