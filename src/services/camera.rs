use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::services::image_ref::ImageData;

/// A live video source that can hand out single encoded frames.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Open the stream. Idempotent.
    async fn start(&self) -> Result<(), CameraError>;

    /// Grab one encoded frame. The camera must be started.
    async fn snapshot(&self) -> Result<ImageData, CameraError>;

    /// Release the device. Safe to call when already stopped.
    async fn stop(&self);
}

/// Camera exposed as an HTTP snapshot endpoint (IP cameras, mjpg-streamer,
/// a local capture daemon). Each snapshot is one GET returning a JPEG/PNG.
pub struct HttpCamera {
    http: reqwest::Client,
    snapshot_url: String,
    active: AtomicBool,
}

impl HttpCamera {
    pub fn new(snapshot_url: impl Into<String>) -> Result<Self, CameraError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            snapshot_url: snapshot_url.into(),
            active: AtomicBool::new(false),
        })
    }

    async fn fetch_frame(&self) -> Result<ImageData, CameraError> {
        let response = self.http.get(&self.snapshot_url).send().await?;
        if !response.status().is_success() {
            return Err(CameraError::Device(format!(
                "snapshot endpoint returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?.to_vec();
        ImageData::from_bytes(bytes).map_err(|_| CameraError::BadFrame)
    }
}

#[async_trait]
impl Camera for HttpCamera {
    async fn start(&self) -> Result<(), CameraError> {
        if self.active.load(Ordering::Acquire) {
            return Ok(());
        }
        // Probe so a dead camera fails before the countdown, not after.
        self.fetch_frame().await?;
        self.active.store(true, Ordering::Release);
        tracing::debug!(url = %self.snapshot_url, "Camera started");
        Ok(())
    }

    async fn snapshot(&self) -> Result<ImageData, CameraError> {
        if !self.active.load(Ordering::Acquire) {
            return Err(CameraError::NotStarted);
        }
        self.fetch_frame().await
    }

    async fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::debug!(url = %self.snapshot_url, "Camera released");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera not started")]
    NotStarted,

    #[error("Camera device error: {0}")]
    Device(String),

    #[error("Camera returned an unreadable frame")]
    BadFrame,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}
