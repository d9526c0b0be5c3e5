use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::error::TryoutError;
use crate::db::JobStore;
use crate::models::job::{JobStatus, Transition, TryoutJob};
use crate::services::extraction::{ExtractionError, ImageExtractor};
use crate::services::image_ref::ImageData;

/// Where the clothing image for a job comes from.
#[derive(Debug, Clone)]
pub enum ClothingSource {
    /// A product page (or direct image) URL to extract from.
    Url(String),
    /// Raw image bytes uploaded by the user.
    Upload(Vec<u8>),
}

/// Resolves a product page URL to a clothing image URL.
#[async_trait]
pub trait ClothingImageSource: Send + Sync {
    async fn extract(&self, page_url: &str) -> Result<String, ExtractionError>;
}

#[async_trait]
impl ClothingImageSource for ImageExtractor {
    async fn extract(&self, page_url: &str) -> Result<String, ExtractionError> {
        ImageExtractor::extract(self, page_url).await
    }
}

/// Moves a `pending` job to `waiting_photo` once its clothing image is known.
pub struct SubmissionHandler {
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn ClothingImageSource>,
}

impl SubmissionHandler {
    pub fn new(store: Arc<dyn JobStore>, extractor: Arc<dyn ClothingImageSource>) -> Self {
        Self { store, extractor }
    }

    /// Resolve the clothing image and advance the job.
    ///
    /// Extraction and upload errors leave the job `pending` so the user can
    /// try again. A job that has already left `pending` is never overwritten.
    pub async fn submit(&self, job_id: Uuid, source: ClothingSource) -> Result<TryoutJob, TryoutError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(TryoutError::NotFound(job_id))?;
        ensure_pending(&job)?;

        let transition = match source {
            ClothingSource::Url(url) => {
                let url = url.trim().to_string();
                tracing::info!(job_id = %job_id, url = %url, "Extracting clothing image");
                let image_url = self.extractor.extract(&url).await.map_err(|e| {
                    tracing::warn!(job_id = %job_id, url = %url, error = %e, "Clothing extraction failed");
                    TryoutError::from(e)
                })?;
                Transition::ClothingResolved {
                    clothing_url: Some(url),
                    clothing_image_url: image_url,
                }
            }
            ClothingSource::Upload(bytes) => {
                let image = ImageData::from_bytes(bytes).map_err(|_| TryoutError::InvalidImage)?;
                tracing::info!(
                    job_id = %job_id,
                    mime_type = %image.mime_type,
                    size = image.bytes.len(),
                    "Clothing image uploaded"
                );
                Transition::ClothingResolved {
                    clothing_url: None,
                    clothing_image_url: image.to_data_url(),
                }
            }
        };

        match self.store.apply_transition(job_id, &transition).await? {
            Some(updated) => {
                metrics::counter!("tryout_clothing_submitted_total").increment(1);
                tracing::info!(job_id = %job_id, "Job waiting for photo");
                Ok(updated)
            }
            None => {
                // Someone else resolved (or failed) the job while we extracted.
                let current = self
                    .store
                    .get_job(job_id)
                    .await?
                    .ok_or(TryoutError::NotFound(job_id))?;
                Err(TryoutError::NotPending {
                    id: job_id,
                    status: current.status,
                })
            }
        }
    }
}

fn ensure_pending(job: &TryoutJob) -> Result<(), TryoutError> {
    if job.status == JobStatus::Pending {
        Ok(())
    } else {
        Err(TryoutError::NotPending {
            id: job.id,
            status: job.status,
        })
    }
}
