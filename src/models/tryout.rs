use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Request to submit a clothing page URL for a pending job.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitClothingRequest {
    #[garde(length(min = 1, max = 2048))]
    pub url: String,
}

/// Request body for the standalone extraction endpoint.
#[derive(Debug, Deserialize, Validate)]
pub struct ExtractImageRequest {
    #[garde(length(min = 1, max = 2048))]
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractImageResponse {
    pub image_url: String,
}

/// Request body for the standalone generation endpoint.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[garde(length(min = 1))]
    pub user_photo_url: String,

    #[garde(length(min = 1))]
    pub clothing_image_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Base64 image payload.
    pub image_data: String,
    pub mime_type: String,
}

/// Query string for listing jobs.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: JobStatus,
    pub limit: Option<i64>,
}

/// Voice-assistant command envelope: `{ "action": "...", "data": {...} }`.
#[derive(Debug, Deserialize, Validate)]
pub struct VoiceCommand {
    #[garde(length(min = 1, max = 64))]
    pub action: String,

    #[garde(skip)]
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceCommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}
