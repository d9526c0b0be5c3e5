//! Test doubles for the try-out actors and HTTP helpers for E2E runs.
#![allow(dead_code)]

use async_trait::async_trait;
use mirror_tryout::{
    models::job::TryoutJob,
    services::{
        camera::{Camera, CameraError},
        extraction::ExtractionError,
        generation::{GenerationError, ImageGenerator},
        image_ref::ImageData,
    },
    tryout::{
        presentation::DisplayError, submission::ClothingImageSource, ResultDisplay,
    },
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Smallest byte string `image::guess_format` recognises as PNG.
pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

pub fn png_image() -> ImageData {
    ImageData::new(PNG.to_vec(), "image/png")
}

/// Extractor that maps every page to one image URL.
pub struct StaticExtractor(pub &'static str);

#[async_trait]
impl ClothingImageSource for StaticExtractor {
    async fn extract(&self, _page_url: &str) -> Result<String, ExtractionError> {
        Ok(self.0.to_string())
    }
}

/// Camera that always returns the same PNG and records start/stop balance.
#[derive(Default)]
pub struct FakeCamera {
    pub active: AtomicBool,
    pub snapshots: AtomicUsize,
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
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(png_image())
    }

    async fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Generator returning a fixed image (or a text-only refusal), counting calls.
#[derive(Default)]
pub struct FakeGenerator {
    pub refusal: Option<&'static str>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn refusing(text: &'static str) -> Self {
        Self {
            refusal: Some(text),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(
        &self,
        _person: &ImageData,
        _garment: &ImageData,
    ) -> Result<ImageData, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        match self.refusal {
            Some(text) => Err(GenerationError::TextOnly(text.to_string())),
            None => Ok(png_image()),
        }
    }
}

/// Display that records which jobs were put on screen.
#[derive(Default)]
pub struct RecordingDisplay {
    pub shown: Mutex<Vec<Uuid>>,
}

impl RecordingDisplay {
    pub fn shown(&self) -> Vec<Uuid> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultDisplay for RecordingDisplay {
    async fn show_result(&self, job: &TryoutJob, _duration: Duration) -> Result<(), DisplayError> {
        self.shown.lock().unwrap().push(job.id);
        Ok(())
    }

    async fn show_confirmation(&self, _job: &TryoutJob, _duration: Duration) -> Result<(), DisplayError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), DisplayError> {
        Ok(())
    }
}

/// Job as returned by the HTTP API.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub status: String,
    pub clothing_url: Option<String>,
    pub clothing_image_url: Option<String>,
    pub result_image_url: Option<String>,
    pub error_message: Option<String>,
}

/// POST /api/tryout/jobs
pub async fn create_job(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<JobResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/tryout/jobs", base_url))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Create failed with status {}: {}", status, error_text).into());
    }
    Ok(response.json::<JobResponse>().await?)
}

/// POST /api/tryout/jobs/{id}/clothing/upload
pub async fn upload_clothing(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    image: Vec<u8>,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let form = reqwest::multipart::Form::new().part(
        "image",
        reqwest::multipart::Part::bytes(image)
            .file_name("garment.png")
            .mime_str("image/png")?,
    );
    Ok(client
        .post(format!("{}/api/tryout/jobs/{}/clothing/upload", base_url, job_id))
        .multipart(form)
        .send()
        .await?)
}

/// Poll a job until it reaches one of `statuses` (with timeout).
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    statuses: &[&str],
    timeout_secs: u64,
) -> Result<JobResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for _ in 0..max_attempts {
        let job = client
            .get(format!("{}/api/tryout/jobs/{}", base_url, job_id))
            .send()
            .await?
            .json::<JobResponse>()
            .await?;
        if statuses.contains(&job.status.as_str()) {
            return Ok(job);
        }
        sleep(Duration::from_millis(500)).await;
    }

    Err(format!("Job did not reach {:?} within {} seconds", statuses, timeout_secs).into())
}
