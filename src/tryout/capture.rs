use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::error::TryoutError;
use crate::db::JobStore;
use crate::models::job::{JobStatus, Transition, TryoutJob};
use crate::services::camera::Camera;
use crate::services::generation::ImageGenerator;
use crate::services::image_ref::{ImageData, ImageResolver};
use crate::services::storage::{job_image_key, ImageStore};

pub const DEFAULT_COUNTDOWN: Duration = Duration::from_secs(5);

/// Recently attempted ids kept to ignore repeat sightings. A job older than
/// this has long left `waiting_photo`.
const ATTEMPTED_CAPACITY: usize = 256;

/// How one capture attempt ended.
#[derive(Debug)]
pub enum CaptureOutcome {
    Completed(TryoutJob),
    /// The job was moved to `failed`; the row carries the message.
    Failed(TryoutJob),
    /// Another station got there first. Nothing was written.
    ClaimLost,
    Skipped,
    /// Shutdown arrived during the countdown.
    Cancelled,
}

enum Claim {
    Won { job: TryoutJob, photo: ImageData },
    Settled(CaptureOutcome),
}

enum Shot {
    Photo(ImageData),
    MovedOn,
    Cancelled,
    Failed(TryoutError),
}

/// Mirror-side actor: photographs the user for each `waiting_photo` job,
/// claims it and runs generation.
pub struct CaptureHandler {
    store: Arc<dyn JobStore>,
    camera: Arc<dyn Camera>,
    images: Arc<dyn ImageStore>,
    generator: Arc<dyn ImageGenerator>,
    resolver: ImageResolver,
    countdown: Duration,
    /// Jobs this station already started, oldest first.
    attempted: VecDeque<Uuid>,
}

impl CaptureHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        camera: Arc<dyn Camera>,
        images: Arc<dyn ImageStore>,
        generator: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            store,
            camera,
            images,
            generator,
            resolver: ImageResolver::default(),
            countdown: DEFAULT_COUNTDOWN,
            attempted: VecDeque::new(),
        }
    }

    pub fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = countdown;
        self
    }

    pub fn with_resolver(mut self, resolver: ImageResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn should_process(&self, job: &TryoutJob) -> bool {
        job.status == JobStatus::WaitingPhoto
            && job
                .clothing_image_url
                .as_deref()
                .is_some_and(|url| !url.is_empty())
            && !self.attempted.contains(&job.id)
    }

    /// Handle jobs from a watcher until shutdown or the feed ends.
    pub async fn run(mut self, mut jobs: mpsc::Receiver<TryoutJob>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(countdown_secs = self.countdown.as_secs(), "Capture station ready");

        loop {
            let job = tokio::select! {
                _ = shutdown.changed() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            if !self.should_process(&job) {
                continue;
            }

            let job_id = job.id;
            match self.process(job, &mut shutdown).await {
                Ok(CaptureOutcome::Cancelled) => break,
                Ok(CaptureOutcome::Completed(_)) => {
                    tracing::info!(job_id = %job_id, "Try-out completed");
                }
                Ok(CaptureOutcome::Failed(job)) => {
                    tracing::warn!(
                        job_id = %job_id,
                        error = job.error_message.as_deref().unwrap_or_default(),
                        "Try-out failed"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Capture aborted");
                }
            }
        }

        self.camera.stop().await;
        tracing::info!("Capture station stopped");
    }

    /// Capture, claim and generate for one job.
    ///
    /// Store errors before the claim are returned and the job stays eligible
    /// for a retry. After the claim every failure, store errors included, ends
    /// with a best-effort write to `failed`.
    pub async fn process(
        &mut self,
        job: TryoutJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CaptureOutcome, TryoutError> {
        if !self.should_process(&job) {
            return Ok(CaptureOutcome::Skipped);
        }
        self.remember(job.id);
        tracing::info!(job_id = %job.id, "Starting photo capture");

        let (claimed, photo) = match self.capture_and_claim(&job, shutdown).await {
            Ok(Claim::Won { job, photo }) => (job, photo),
            Ok(Claim::Settled(outcome)) => return Ok(outcome),
            Err(e) => {
                self.forget(job.id);
                return Err(e);
            }
        };
        tracing::info!(job_id = %claimed.id, "Job claimed, generating");

        match self.generate_and_complete(&claimed, &photo).await {
            Err(TryoutError::Store(e)) => {
                tracing::error!(job_id = %claimed.id, error = %e, "Store error after claim");
                self.fail(claimed.id, JobStatus::Processing, TryoutError::Store(e))
                    .await
            }
            other => other,
        }
    }

    async fn capture_and_claim(
        &self,
        job: &TryoutJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Claim, TryoutError> {
        let shot = self.take_photo(job.id, shutdown).await;
        self.camera.stop().await;

        let photo = match shot? {
            Shot::Photo(photo) => photo,
            Shot::Cancelled => {
                tracing::info!(job_id = %job.id, "Capture cancelled");
                return Ok(Claim::Settled(CaptureOutcome::Cancelled));
            }
            Shot::MovedOn => return Ok(Claim::Settled(self.claim_lost(job.id))),
            Shot::Failed(e) => {
                return self
                    .fail(job.id, JobStatus::WaitingPhoto, e)
                    .await
                    .map(Claim::Settled)
            }
        };

        let key = job_image_key(job.id, "photo", &photo);
        let user_photo_url = match self.images.put(&key, &photo).await {
            Ok(url) => url,
            Err(e) => {
                let err = TryoutError::UploadFailed(e.to_string());
                return self
                    .fail(job.id, JobStatus::WaitingPhoto, err)
                    .await
                    .map(Claim::Settled);
            }
        };

        match self
            .store
            .apply_transition(job.id, &Transition::Claimed { user_photo_url })
            .await?
        {
            Some(job) => Ok(Claim::Won { job, photo }),
            None => Ok(Claim::Settled(self.claim_lost(job.id))),
        }
    }

    async fn generate_and_complete(
        &self,
        claimed: &TryoutJob,
        photo: &ImageData,
    ) -> Result<CaptureOutcome, TryoutError> {
        let result = match self.generate(claimed, photo).await {
            Ok(result) => result,
            Err(e) => return self.fail(claimed.id, JobStatus::Processing, e).await,
        };

        let key = job_image_key(claimed.id, "result", &result);
        let result_image_url = match self.images.put(&key, &result).await {
            Ok(url) => url,
            Err(e) => {
                let err = TryoutError::UploadFailed(e.to_string());
                return self.fail(claimed.id, JobStatus::Processing, err).await;
            }
        };

        match self
            .store
            .apply_transition(claimed.id, &Transition::Completed { result_image_url })
            .await?
        {
            Some(done) => {
                metrics::counter!("tryout_jobs_completed_total").increment(1);
                Ok(CaptureOutcome::Completed(done))
            }
            None => Ok(self.claim_lost(claimed.id)),
        }
    }

    fn remember(&mut self, job_id: Uuid) {
        if self.attempted.len() >= ATTEMPTED_CAPACITY {
            self.attempted.pop_front();
        }
        self.attempted.push_back(job_id);
    }

    fn forget(&mut self, job_id: Uuid) {
        self.attempted.retain(|id| *id != job_id);
    }

    /// Start the camera, count down, confirm the job is still ours, snapshot.
    /// The caller stops the camera whatever this returns.
    async fn take_photo(
        &self,
        job_id: Uuid,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Shot, TryoutError> {
        if let Err(e) = self.camera.start().await {
            return Ok(Shot::Failed(TryoutError::UploadFailed(e.to_string())));
        }

        tokio::select! {
            _ = tokio::time::sleep(self.countdown) => {}
            _ = shutdown.changed() => return Ok(Shot::Cancelled),
        }

        let current = self.store.get_job(job_id).await?;
        if current.map(|job| job.status) != Some(JobStatus::WaitingPhoto) {
            return Ok(Shot::MovedOn);
        }

        match self.camera.snapshot().await {
            Ok(photo) => Ok(Shot::Photo(photo)),
            Err(e) => Ok(Shot::Failed(TryoutError::UploadFailed(e.to_string()))),
        }
    }

    async fn generate(&self, job: &TryoutJob, person: &ImageData) -> Result<ImageData, TryoutError> {
        let reference = job.clothing_image_url.as_deref().unwrap_or_default();
        let garment = self.resolver.resolve(reference).await.map_err(|e| {
            TryoutError::UploadFailed(format!("could not load clothing image: {e}"))
        })?;

        let started = Instant::now();
        let result = self.generator.generate(person, &garment).await;
        metrics::histogram!("tryout_generation_seconds").record(started.elapsed().as_secs_f64());
        Ok(result?)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        from: JobStatus,
        err: TryoutError,
    ) -> Result<CaptureOutcome, TryoutError> {
        tracing::warn!(job_id = %job_id, error = %err, "Marking job failed");
        match self
            .store
            .apply_transition(job_id, &Transition::failed(from, err.to_string()))
            .await?
        {
            Some(failed) => {
                metrics::counter!("tryout_jobs_failed_total").increment(1);
                Ok(CaptureOutcome::Failed(failed))
            }
            None => Ok(self.claim_lost(job_id)),
        }
    }

    fn claim_lost(&self, job_id: Uuid) -> CaptureOutcome {
        metrics::counter!("tryout_claims_lost_total").increment(1);
        tracing::debug!(job_id = %job_id, "Job taken by another station");
        CaptureOutcome::ClaimLost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryJobStore, StoreError};
    use crate::models::closet::{ClosetEntry, NewClosetEntry};
    use crate::models::job::JobNotice;
    use crate::services::camera::CameraError;
    use crate::services::generation::GenerationError;
    use crate::services::storage::InlineImageStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];

    #[derive(Default)]
    struct FakeCamera {
        active: AtomicBool,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Camera for FakeCamera {
        async fn start(&self) -> Result<(), CameraError> {
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn snapshot(&self) -> Result<ImageData, CameraError> {
            if !self.active.load(Ordering::SeqCst) {
                return Err(CameraError::NotStarted);
            }
            Ok(ImageData::new(PNG.to_vec(), "image/png"))
        }
        async fn stop(&self) {
            self.active.store(false, Ordering::SeqCst);
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Memory store whose next transition into `fail_on` errors once.
    struct FlakyStore {
        inner: MemoryJobStore,
        fail_on: JobStatus,
        armed: AtomicBool,
    }

    impl FlakyStore {
        fn failing_once(fail_on: JobStatus) -> Self {
            Self {
                inner: MemoryJobStore::new(),
                fail_on,
                armed: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn create_job(&self) -> Result<TryoutJob, StoreError> {
            self.inner.create_job().await
        }
        async fn get_job(&self, id: Uuid) -> Result<Option<TryoutJob>, StoreError> {
            self.inner.get_job(id).await
        }
        async fn apply_transition(
            &self,
            id: Uuid,
            transition: &Transition,
        ) -> Result<Option<TryoutJob>, StoreError> {
            if transition.target() == self.fail_on && self.armed.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.apply_transition(id, transition).await
        }
        async fn list_by_status(
            &self,
            status: JobStatus,
            since: Option<chrono::DateTime<chrono::Utc>>,
            limit: i64,
        ) -> Result<Vec<TryoutJob>, StoreError> {
            self.inner.list_by_status(status, since, limit).await
        }
        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobNotice> {
            self.inner.subscribe()
        }
        async fn add_closet_entry(&self, entry: &NewClosetEntry) -> Result<ClosetEntry, StoreError> {
            self.inner.add_closet_entry(entry).await
        }
        async fn list_closet(&self, limit: i64) -> Result<Vec<ClosetEntry>, StoreError> {
            self.inner.list_closet(limit).await
        }
        async fn health_check(&self) -> Result<(), StoreError> {
            self.inner.health_check().await
        }
    }

    struct FakeGenerator(Option<&'static str>);

    #[async_trait]
    impl ImageGenerator for FakeGenerator {
        async fn generate(&self, _p: &ImageData, _g: &ImageData) -> Result<ImageData, GenerationError> {
            match self.0 {
                Some(text) => Err(GenerationError::TextOnly(text.to_string())),
                None => Ok(ImageData::new(PNG.to_vec(), "image/png")),
            }
        }
    }

    async fn waiting_job(store: &dyn JobStore) -> TryoutJob {
        let job = store.create_job().await.unwrap();
        store
            .apply_transition(
                job.id,
                &Transition::ClothingResolved {
                    clothing_url: None,
                    clothing_image_url: ImageData::new(PNG.to_vec(), "image/png").to_data_url(),
                },
            )
            .await
            .unwrap()
            .unwrap()
    }

    fn handler(
        store: Arc<dyn JobStore>,
        camera: Arc<FakeCamera>,
        refusal: Option<&'static str>,
    ) -> CaptureHandler {
        CaptureHandler::new(
            store,
            camera,
            Arc::new(InlineImageStore),
            Arc::new(FakeGenerator(refusal)),
        )
        .with_countdown(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_capture_completes_job() {
        let store = Arc::new(MemoryJobStore::new());
        let camera = Arc::new(FakeCamera::default());
        let job = waiting_job(&*store).await;
        let (_stop, mut shutdown) = watch::channel(false);

        let mut handler = handler(store.clone(), camera.clone(), None);
        let outcome = handler.process(job.clone(), &mut shutdown).await.unwrap();

        let CaptureOutcome::Completed(done) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.user_photo_url.is_some());
        assert!(done.result_image_url.unwrap().starts_with("data:image/png"));
        assert!(!camera.active.load(Ordering::SeqCst));
        // Seen again via poll: not reprocessed.
        assert!(!handler.should_process(&job));
    }

    #[tokio::test]
    async fn test_text_only_generation_fails_job() {
        let store = Arc::new(MemoryJobStore::new());
        let camera = Arc::new(FakeCamera::default());
        let job = waiting_job(&*store).await;
        let (_stop, mut shutdown) = watch::channel(false);

        let outcome = handler(store.clone(), camera, Some("I can't do that"))
            .process(job, &mut shutdown)
            .await
            .unwrap();

        let CaptureOutcome::Failed(failed) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error_message.unwrap().contains("I can't do that"));
        assert!(failed.result_image_url.is_none());
    }

    #[tokio::test]
    async fn test_job_moved_during_countdown_is_claim_lost() {
        let store = Arc::new(MemoryJobStore::new());
        let camera = Arc::new(FakeCamera::default());
        let job = waiting_job(&*store).await;
        store
            .apply_transition(job.id, &Transition::failed(JobStatus::WaitingPhoto, "cancelled"))
            .await
            .unwrap();
        let (_stop, mut shutdown) = watch::channel(false);

        let outcome = handler(store.clone(), camera.clone(), None)
            .process(job.clone(), &mut shutdown)
            .await
            .unwrap();

        assert!(matches!(outcome, CaptureOutcome::ClaimLost));
        assert_eq!(camera.stops.load(Ordering::SeqCst), 1);
        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_countdown_and_releases_camera() {
        let store = Arc::new(MemoryJobStore::new());
        let camera = Arc::new(FakeCamera::default());
        let job = waiting_job(&*store).await;
        let (stop, mut shutdown) = watch::channel(false);

        let mut handler = handler(store.clone(), camera.clone(), None)
            .with_countdown(Duration::from_secs(60));
        let task = tokio::spawn(async move { handler.process(job, &mut shutdown).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.send(true).unwrap();

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, CaptureOutcome::Cancelled));
        assert!(!camera.active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_skips_jobs_without_clothing() {
        let store = Arc::new(MemoryJobStore::new());
        let pending = store.create_job().await.unwrap();
        let (_stop, mut shutdown) = watch::channel(false);

        let mut handler = handler(store, Arc::new(FakeCamera::default()), None);
        let outcome = handler.process(pending, &mut shutdown).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_store_error_on_completion_fails_job() {
        let store = Arc::new(FlakyStore::failing_once(JobStatus::Completed));
        let job = waiting_job(&*store).await;
        let (_stop, mut shutdown) = watch::channel(false);

        let outcome = handler(store.clone(), Arc::new(FakeCamera::default()), None)
            .process(job.clone(), &mut shutdown)
            .await
            .unwrap();

        let CaptureOutcome::Failed(failed) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error_message.unwrap().contains("connection reset"));
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_store_error_before_claim_allows_retry() {
        let store = Arc::new(FlakyStore::failing_once(JobStatus::Processing));
        let job = waiting_job(&*store).await;
        let (_stop, mut shutdown) = watch::channel(false);

        let mut handler = handler(store.clone(), Arc::new(FakeCamera::default()), None);
        let first = handler.process(job.clone(), &mut shutdown).await;
        assert!(matches!(first, Err(TryoutError::Store(_))));
        assert_eq!(
            store.get_job(job.id).await.unwrap().unwrap().status,
            JobStatus::WaitingPhoto
        );

        // The next sighting of the job is handled again.
        assert!(handler.should_process(&job));
        let second = handler.process(job.clone(), &mut shutdown).await.unwrap();
        assert!(matches!(second, CaptureOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_attempted_ids_are_bounded() {
        let store = Arc::new(MemoryJobStore::new());
        let mut handler = handler(store, Arc::new(FakeCamera::default()), None);
        let first = Uuid::new_v4();
        handler.remember(first);
        for _ in 0..ATTEMPTED_CAPACITY {
            handler.remember(Uuid::new_v4());
        }
        assert_eq!(handler.attempted.len(), ATTEMPTED_CAPACITY);
        assert!(!handler.attempted.contains(&first));
    }
}
