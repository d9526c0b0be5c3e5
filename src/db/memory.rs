use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{JobStore, StoreError, NOTICE_BUFFER};
use crate::models::closet::{ClosetEntry, NewClosetEntry};
use crate::models::job::{JobNotice, JobStatus, Transition, TryoutJob};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, TryoutJob>,
    closet: Vec<ClosetEntry>,
}

/// In-process job store with the same compare-and-swap semantics as Postgres.
///
/// Used for local development (`STORE_BACKEND=memory`) and tests.
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    notices: broadcast::Sender<JobNotice>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            inner: Mutex::new(Inner::default()),
            notices,
        }
    }

    /// Insert or replace a job as-is, emitting a notice.
    pub fn insert_job(&self, job: TryoutJob) -> Result<(), StoreError> {
        let notice = JobNotice {
            id: job.id,
            status: job.status,
        };
        self.lock()?.jobs.insert(job.id, job);
        let _ = self.notices.send(notice);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self) -> Result<TryoutJob, StoreError> {
        let job = TryoutJob::new_pending(Uuid::new_v4(), Utc::now());
        self.insert_job(job.clone())?;
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<TryoutJob>, StoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        transition: &Transition,
    ) -> Result<Option<TryoutJob>, StoreError> {
        transition.validate()?;

        let updated = {
            let mut inner = self.lock()?;
            let Some(current) = inner.jobs.get(&id) else {
                return Ok(None);
            };
            let Some(next) = current.transitioned(transition, Utc::now()) else {
                return Ok(None);
            };
            inner.jobs.insert(id, next.clone());
            next
        };

        let _ = self.notices.send(JobNotice {
            id,
            status: updated.status,
        });
        Ok(Some(updated))
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<TryoutJob>, StoreError> {
        let inner = self.lock()?;
        let mut jobs: Vec<TryoutJob> = inner
            .jobs
            .values()
            .filter(|job| job.status == status)
            .filter(|job| since.map_or(true, |since| job.created_at >= since))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    fn subscribe(&self) -> broadcast::Receiver<JobNotice> {
        self.notices.subscribe()
    }

    async fn add_closet_entry(&self, entry: &NewClosetEntry) -> Result<ClosetEntry, StoreError> {
        let mut inner = self.lock()?;
        if !inner.jobs.contains_key(&entry.job_id) {
            return Err(StoreError::Unavailable(format!(
                "closet entry references unknown job {}",
                entry.job_id
            )));
        }
        let saved = ClosetEntry {
            id: Uuid::new_v4(),
            job_id: entry.job_id,
            clothing_url: entry.clothing_url.clone(),
            clothing_image_url: entry.clothing_image_url.clone(),
            result_image_url: entry.result_image_url.clone(),
            created_at: Utc::now(),
        };
        inner.closet.push(saved.clone());
        Ok(saved)
    }

    async fn list_closet(&self, limit: i64) -> Result<Vec<ClosetEntry>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .closet
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
