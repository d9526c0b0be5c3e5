use uuid::Uuid;

use crate::db::StoreError;
use crate::models::job::JobStatus;
use crate::services::extraction::ExtractionError;
use crate::services::generation::GenerationError;

/// Failures of the try-out workflow, as seen by the actor that hit them.
#[derive(Debug, thiserror::Error)]
pub enum TryoutError {
    /// The clothing image could not be resolved from the submitted URL.
    #[error("Clothing extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractionError),

    /// The photo (or result) could not be captured or persisted.
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),

    /// Another actor moved the job first. Not reported to users.
    #[error("Job {0} was claimed by another actor")]
    ClaimLost(Uuid),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} is {status}, expected pending")]
    NotPending { id: Uuid, status: JobStatus },

    #[error("Unreadable image upload")]
    InvalidImage,

    #[error(transparent)]
    Store(#[from] StoreError),
}
