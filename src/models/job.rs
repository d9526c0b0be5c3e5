use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Status of a photo try-out job.
///
/// Jobs only move forward: `pending → waiting_photo → processing → completed`.
/// `failed` can be entered from any non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    WaitingPhoto,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self → next` is an edge of the job state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, WaitingPhoto) => true,
            (WaitingPhoto, Processing) => true,
            (Processing, Completed) => true,
            (Pending | WaitingPhoto | Processing, Failed) => true,
            _ => false,
        }
    }
}

/// A single photo try-out attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryoutJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub clothing_url: Option<String>,
    pub clothing_image_url: Option<String>,
    pub user_photo_url: Option<String>,
    pub result_image_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryoutJob {
    /// A freshly created job in `pending` with no references.
    pub fn new_pending(id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            clothing_url: None,
            clothing_image_url: None,
            user_photo_url: None,
            result_image_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a transition to an in-memory copy of the job.
    ///
    /// Returns `None` when the job is not in the transition's expected status,
    /// or the claim would overwrite an existing photo.
    pub fn transitioned(&self, transition: &Transition, now: DateTime<Utc>) -> Option<TryoutJob> {
        if self.status != transition.expected() {
            return None;
        }
        let mut next = self.clone();
        next.status = transition.target();
        next.updated_at = now;
        match transition {
            Transition::ClothingResolved {
                clothing_url,
                clothing_image_url,
            } => {
                next.clothing_url = clothing_url.clone();
                next.clothing_image_url = Some(clothing_image_url.clone());
            }
            Transition::Claimed { user_photo_url } => {
                if self.user_photo_url.is_some() {
                    return None;
                }
                next.user_photo_url = Some(user_photo_url.clone());
            }
            Transition::Completed { result_image_url } => {
                next.result_image_url = Some(result_image_url.clone());
                next.error_message = None;
            }
            Transition::Failed { error_message, .. } => {
                next.error_message = Some(error_message.clone());
                next.result_image_url = None;
            }
        }
        Some(next)
    }
}

/// A forward move of a job, carrying the fields written with it.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// pending → waiting_photo
    ClothingResolved {
        clothing_url: Option<String>,
        clothing_image_url: String,
    },
    /// waiting_photo → processing; the claim.
    Claimed { user_photo_url: String },
    /// processing → completed
    Completed { result_image_url: String },
    /// any non-terminal → failed
    Failed {
        from: JobStatus,
        error_message: String,
    },
}

impl Transition {
    pub fn failed(from: JobStatus, error_message: impl Into<String>) -> Self {
        Transition::Failed {
            from,
            error_message: error_message.into(),
        }
    }

    /// Status the job must currently be in.
    pub fn expected(&self) -> JobStatus {
        match self {
            Transition::ClothingResolved { .. } => JobStatus::Pending,
            Transition::Claimed { .. } => JobStatus::WaitingPhoto,
            Transition::Completed { .. } => JobStatus::Processing,
            Transition::Failed { from, .. } => *from,
        }
    }

    pub fn target(&self) -> JobStatus {
        match self {
            Transition::ClothingResolved { .. } => JobStatus::WaitingPhoto,
            Transition::Claimed { .. } => JobStatus::Processing,
            Transition::Completed { .. } => JobStatus::Completed,
            Transition::Failed { .. } => JobStatus::Failed,
        }
    }

    /// Checks the edge exists and the payload is usable.
    pub fn validate(&self) -> Result<(), InvalidTransition> {
        if !self.expected().can_transition_to(self.target()) {
            return Err(InvalidTransition::Edge {
                from: self.expected(),
                to: self.target(),
            });
        }
        let payload = match self {
            Transition::ClothingResolved {
                clothing_image_url, ..
            } => clothing_image_url,
            Transition::Claimed { user_photo_url } => user_photo_url,
            Transition::Completed { result_image_url } => result_image_url,
            Transition::Failed { error_message, .. } => error_message,
        };
        if payload.trim().is_empty() {
            return Err(InvalidTransition::EmptyPayload(self.target()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidTransition {
    #[error("transition {from} -> {to} is not allowed")]
    Edge { from: JobStatus, to: JobStatus },

    #[error("transition to {0} requires a non-empty value")]
    EmptyPayload(JobStatus),
}

/// Change-feed event: the store saw a job inserted or updated.
///
/// Receivers re-read the row; the notice itself never carries image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNotice {
    pub id: Uuid,
    pub status: JobStatus,
}
