use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::TryoutJob;

/// A confirmed try-out result saved to the closet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClosetEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub clothing_url: Option<String>,
    pub clothing_image_url: Option<String>,
    pub result_image_url: String,
    pub created_at: DateTime<Utc>,
}

/// Helper for inserting closet entries
#[derive(Debug, Clone, PartialEq)]
pub struct NewClosetEntry {
    pub job_id: Uuid,
    pub clothing_url: Option<String>,
    pub clothing_image_url: Option<String>,
    pub result_image_url: String,
}

impl NewClosetEntry {
    /// Copy the references of a completed job. `None` if it has no result.
    pub fn from_job(job: &TryoutJob) -> Option<Self> {
        let result_image_url = job.result_image_url.clone()?;
        Some(Self {
            job_id: job.id,
            clothing_url: job.clothing_url.clone(),
            clothing_image_url: job.clothing_image_url.clone(),
            result_image_url,
        })
    }
}
