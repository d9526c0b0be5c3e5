use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use super::gesture::{Answer, GestureClassifier, MotionSample};
use super::shown::{ShownStore, ShownStoreError};
use crate::db::{JobStore, StoreError};
use crate::models::closet::{ClosetEntry, NewClosetEntry};
use crate::models::job::{JobStatus, TryoutJob};
use crate::services::image_ref::{ImageRefError, ImageResolver};

/// Viewer input while a result is on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfirmInput {
    /// Close the result early.
    Dismiss,
    Answer(Answer),
    /// Raw head movement from the gesture camera.
    Motion(MotionSample),
}

impl ConfirmInput {
    /// Parse a line typed on the kiosk console: `y`/`yes`, `n`/`no`, or
    /// an empty line / `d` to dismiss.
    pub fn parse_line(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(Self::Answer(Answer::Yes)),
            "n" | "no" => Some(Self::Answer(Answer::No)),
            "" | "d" | "dismiss" => Some(Self::Dismiss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PresentationTimings {
    pub presentation: Duration,
    pub confirmation: Duration,
    /// Ask "save to closet?" after the presentation countdown.
    pub confirm: bool,
}

impl Default for PresentationTimings {
    fn default() -> Self {
        Self {
            presentation: Duration::from_secs(20),
            confirmation: Duration::from_secs(10),
            confirm: true,
        }
    }
}

#[derive(Debug)]
pub enum PresentationOutcome {
    /// Confirmed; the closet entry that was written.
    Saved(ClosetEntry),
    /// Declined or timed out.
    Declined,
    /// Shown without a confirmation step.
    Shown,
    Skipped,
    Cancelled,
}

/// Where results are rendered.
#[async_trait]
pub trait ResultDisplay: Send + Sync {
    async fn show_result(&self, job: &TryoutJob, duration: Duration) -> Result<(), DisplayError>;

    async fn show_confirmation(&self, job: &TryoutJob, duration: Duration) -> Result<(), DisplayError>;

    async fn clear(&self) -> Result<(), DisplayError>;
}

#[derive(Serialize)]
struct DisplayState<'a> {
    phase: &'a str,
    job_id: Option<Uuid>,
    image_file: Option<String>,
    clothing_url: Option<&'a str>,
    expires_in_secs: Option<u64>,
}

/// Kiosk display: writes the decoded result image and a `current.json`
/// sidecar into a directory that the mirror's browser view watches.
pub struct FileDisplay {
    dir: PathBuf,
    resolver: ImageResolver,
}

impl FileDisplay {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            resolver: ImageResolver::default(),
        }
    }

    async fn write_state(&self, state: &DisplayState<'_>) -> Result<(), DisplayError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let raw = serde_json::to_vec_pretty(state)?;
        let tmp = self.dir.join("current.json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, self.dir.join("current.json")).await?;
        Ok(())
    }

    async fn render(&self, job: &TryoutJob, phase: &str, duration: Duration) -> Result<(), DisplayError> {
        let reference = job
            .result_image_url
            .as_deref()
            .ok_or(DisplayError::MissingResult(job.id))?;
        let image = self.resolver.resolve(reference).await?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = format!("result.{}", image.extension());
        tokio::fs::write(self.dir.join(&file_name), &image.bytes).await?;

        self.write_state(&DisplayState {
            phase,
            job_id: Some(job.id),
            image_file: Some(file_name),
            clothing_url: job.clothing_url.as_deref(),
            expires_in_secs: Some(duration.as_secs()),
        })
        .await
    }
}

#[async_trait]
impl ResultDisplay for FileDisplay {
    async fn show_result(&self, job: &TryoutJob, duration: Duration) -> Result<(), DisplayError> {
        self.render(job, "result", duration).await
    }

    async fn show_confirmation(&self, job: &TryoutJob, duration: Duration) -> Result<(), DisplayError> {
        self.render(job, "confirmation", duration).await
    }

    async fn clear(&self) -> Result<(), DisplayError> {
        self.write_state(&DisplayState {
            phase: "idle",
            job_id: None,
            image_file: None,
            clothing_url: None,
            expires_in_secs: None,
        })
        .await
    }
}

/// Display-side actor: shows each completed job once and optionally asks
/// whether to keep it.
pub struct ResultPresenter {
    store: Arc<dyn JobStore>,
    shown: ShownStore,
    display: Arc<dyn ResultDisplay>,
    timings: PresentationTimings,
    classifier: GestureClassifier,
}

impl ResultPresenter {
    pub fn new(
        store: Arc<dyn JobStore>,
        shown: ShownStore,
        display: Arc<dyn ResultDisplay>,
        timings: PresentationTimings,
    ) -> Self {
        Self {
            store,
            shown,
            display,
            timings,
            classifier: GestureClassifier::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: GestureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn shown(&self) -> &ShownStore {
        &self.shown
    }

    pub fn should_process(&self, job: &TryoutJob) -> bool {
        job.status == JobStatus::Completed
            && job
                .result_image_url
                .as_deref()
                .is_some_and(|url| !url.is_empty())
            && job.error_message.is_none()
            && !self.shown.contains(&job.id)
    }

    pub async fn run(
        mut self,
        mut jobs: mpsc::Receiver<TryoutJob>,
        mut inputs: mpsc::Receiver<ConfirmInput>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            presentation_secs = self.timings.presentation.as_secs(),
            confirm = self.timings.confirm,
            "Result display ready"
        );

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
            match self.present(job, &mut inputs, &mut shutdown).await {
                Ok(PresentationOutcome::Cancelled) => break,
                Ok(PresentationOutcome::Saved(entry)) => {
                    tracing::info!(job_id = %job_id, entry_id = %entry.id, "Saved to closet");
                }
                Ok(outcome) => tracing::debug!(job_id = %job_id, ?outcome, "Presentation finished"),
                Err(e) => tracing::error!(job_id = %job_id, error = %e, "Presentation failed"),
            }
        }

        if let Err(e) = self.display.clear().await {
            tracing::warn!(error = %e, "Failed to clear display");
        }
        tracing::info!("Result display stopped");
    }

    /// Show one result, then run the confirmation step if enabled.
    ///
    /// The id is recorded as shown before anything is displayed, so a crash
    /// mid-presentation never shows the same result twice.
    pub async fn present(
        &mut self,
        job: TryoutJob,
        inputs: &mut mpsc::Receiver<ConfirmInput>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PresentationOutcome, PresentationError> {
        if !self.should_process(&job) {
            return Ok(PresentationOutcome::Skipped);
        }
        self.shown.insert(job.id).await?;
        tracing::info!(job_id = %job.id, "Presenting try-out result");

        self.display
            .show_result(&job, self.timings.presentation)
            .await?;

        if !self.wait_presentation(inputs, shutdown).await {
            self.display.clear().await?;
            return Ok(PresentationOutcome::Cancelled);
        }

        if !self.timings.confirm {
            self.display.clear().await?;
            return Ok(PresentationOutcome::Shown);
        }

        // Anything typed or gestured before the question was asked doesn't count.
        while inputs.try_recv().is_ok() {}
        self.classifier.reset();

        self.display
            .show_confirmation(&job, self.timings.confirmation)
            .await?;
        let answer = self.wait_answer(inputs, shutdown).await;
        self.display.clear().await?;

        match answer {
            None => Ok(PresentationOutcome::Cancelled),
            Some(Answer::No) => {
                tracing::info!(job_id = %job.id, "Result declined");
                Ok(PresentationOutcome::Declined)
            }
            Some(Answer::Yes) => {
                let Some(entry) = NewClosetEntry::from_job(&job) else {
                    return Ok(PresentationOutcome::Declined);
                };
                let saved = self.store.add_closet_entry(&entry).await?;
                metrics::counter!("tryout_closet_entries_total").increment(1);
                Ok(PresentationOutcome::Saved(saved))
            }
        }
    }

    /// False on shutdown.
    async fn wait_presentation(
        &self,
        inputs: &mut mpsc::Receiver<ConfirmInput>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let deadline = Instant::now() + self.timings.presentation;
        let mut inputs_open = true;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                _ = shutdown.changed() => return false,
                input = inputs.recv(), if inputs_open => match input {
                    Some(ConfirmInput::Dismiss) => return true,
                    Some(_) => {}
                    None => inputs_open = false,
                },
            }
        }
    }

    /// The first answer, `No` on timeout, `None` on shutdown.
    async fn wait_answer(
        &mut self,
        inputs: &mut mpsc::Receiver<ConfirmInput>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Answer> {
        let deadline = Instant::now() + self.timings.confirmation;
        let mut inputs_open = true;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Some(Answer::No),
                _ = shutdown.changed() => return None,
                input = inputs.recv(), if inputs_open => match input {
                    Some(ConfirmInput::Answer(answer)) => return Some(answer),
                    Some(ConfirmInput::Dismiss) => return Some(Answer::No),
                    Some(ConfirmInput::Motion(sample)) => {
                        if let Some(answer) = self.classifier.push(sample) {
                            tracing::debug!(%answer, "Gesture recognised");
                            return Some(answer);
                        }
                    }
                    None => inputs_open = false,
                },
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("Job {0} has no result image")]
    MissingResult(Uuid),

    #[error("Failed to load result image: {0}")]
    Image(#[from] ImageRefError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PresentationError {
    #[error("Shown-id store error: {0}")]
    Shown(#[from] ShownStoreError),

    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
