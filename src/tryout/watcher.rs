use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::db::JobStore;
use crate::models::job::{JobNotice, JobStatus, TryoutJob};

const POLL_BATCH: i64 = 20;
const CHANNEL_CAPACITY: usize = 64;

/// Merges the store's change feed and a periodic poll into one stream of
/// jobs in a given status.
///
/// The same job can come out more than once (push and poll both see it);
/// consumers decide with their own `should_process` check.
pub struct JobWatcher {
    store: Arc<dyn JobStore>,
    status: JobStatus,
    poll_interval: Duration,
    since: Option<DateTime<Utc>>,
}

impl JobWatcher {
    pub fn new(store: Arc<dyn JobStore>, status: JobStatus, poll_interval: Duration) -> Self {
        Self {
            store,
            status,
            poll_interval,
            since: None,
        }
    }

    /// Only poll for jobs created at or after `since`.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Start watching. The task ends on shutdown or when the receiver is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (mpsc::Receiver<TryoutJob>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(self.run(tx, shutdown));
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<TryoutJob>, mut shutdown: watch::Receiver<bool>) {
        let mut feed = Some(self.store.subscribe());
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(status = %self.status, "Watching for jobs");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let keep_going = tokio::select! {
                _ = shutdown.changed() => false,
                _ = ticker.tick() => self.poll(&tx).await,
                notice = recv_notice(&mut feed) => match notice {
                    Ok(notice) if notice.status == self.status => {
                        self.forward_by_id(notice.id, &tx).await
                    }
                    Ok(_) => true,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, status = %self.status, "Change feed lagged, polling");
                        self.poll(&tx).await
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!(status = %self.status, "Change feed closed, falling back to polling");
                        feed = None;
                        true
                    }
                },
            };

            if !keep_going {
                break;
            }
        }

        tracing::info!(status = %self.status, "Job watcher stopped");
    }

    /// Returns false once the consumer is gone.
    async fn poll(&self, tx: &mpsc::Sender<TryoutJob>) -> bool {
        match self
            .store
            .list_by_status(self.status, self.since, POLL_BATCH)
            .await
        {
            Ok(jobs) => jobs.into_iter().all(|job| offer(tx, job)),
            Err(e) => {
                tracing::warn!(error = %e, status = %self.status, "Job poll failed");
                !tx.is_closed()
            }
        }
    }

    async fn forward_by_id(&self, id: uuid::Uuid, tx: &mpsc::Sender<TryoutJob>) -> bool {
        match self.store.get_job(id).await {
            // Re-check: the row may have moved on since the notice was sent.
            Ok(Some(job)) if job.status == self.status => offer(tx, job),
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Failed to load notified job");
                !tx.is_closed()
            }
        }
    }
}

/// Hand a job to the consumer without blocking. A busy consumer just misses
/// this sighting; the next poll offers the job again. False once it's gone.
fn offer(tx: &mpsc::Sender<TryoutJob>, job: TryoutJob) -> bool {
    match tx.try_send(job) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(job)) => {
            tracing::debug!(job_id = %job.id, "Consumer busy, dropping sighting");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Next notice, or pending forever once the feed is gone.
async fn recv_notice(
    feed: &mut Option<broadcast::Receiver<JobNotice>>,
) -> Result<JobNotice, broadcast::error::RecvError> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
