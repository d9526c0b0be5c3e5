pub mod health;
pub mod metrics;
pub mod proxy;
pub mod tryout;
pub mod voice;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::extraction::ExtractionError;
use crate::tryout::TryoutError;

/// Routes that share [`AppState`]. `/metrics` and middleware are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/tryout/jobs", post(tryout::create_job).get(tryout::list_jobs))
        .route("/api/tryout/jobs/{id}", get(tryout::get_job))
        .route("/api/tryout/jobs/{id}/clothing", post(tryout::submit_clothing))
        .route("/api/tryout/jobs/{id}/clothing/upload", post(tryout::upload_clothing))
        .route("/api/tryout/closet", get(tryout::list_closet))
        .route("/api/tryout/extract-image", post(proxy::extract_image))
        .route("/api/tryout/generate", post(proxy::generate))
        .route("/api/voice", post(voice::voice_command))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// Error returned by HTTP handlers, rendered as `{error, details?, text?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    details: Option<String>,
    text: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
            text: None,
        }
    }

    pub fn with_details(mut self, details: impl ToString) -> Self {
        self.details = Some(details.to_string());
        self
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.error, details = ?self.details, "Request failed");
        }
        let body = ErrorBody {
            error: self.error,
            details: self.details,
            text: self.text,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "Invalid request").with_details(report)
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        let status = match &err {
            ExtractionError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ExtractionError::NoImage => StatusCode::NOT_FOUND,
            ExtractionError::Unreachable(_) | ExtractionError::Http(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, "Could not extract image from URL").with_details(err)
    }
}

impl From<TryoutError> for ApiError {
    fn from(err: TryoutError) -> Self {
        match err {
            TryoutError::ExtractionFailed(e) => e.into(),
            TryoutError::GenerationFailed(e) => {
                let text = e.text().map(str::to_string);
                let mut api = Self::new(StatusCode::BAD_GATEWAY, "Image generation failed")
                    .with_details(&e);
                api.text = text;
                api
            }
            TryoutError::NotFound(id) => Self::not_found(format!("Job {id} not found")),
            e @ (TryoutError::NotPending { .. } | TryoutError::ClaimLost(_)) => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            TryoutError::InvalidImage => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Uploaded file is not a supported image",
            ),
            e @ TryoutError::UploadFailed(_) => Self::internal("Upload failed").with_details(e),
            TryoutError::Store(e) => Self::internal("Database error").with_details(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::services::generation::GenerationError;
    use uuid::Uuid;

    #[test]
    fn test_tryout_error_status_codes() {
        let id = Uuid::new_v4();
        let cases = [
            (TryoutError::NotFound(id), StatusCode::NOT_FOUND),
            (
                TryoutError::NotPending {
                    id,
                    status: JobStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
            (TryoutError::InvalidImage, StatusCode::UNPROCESSABLE_ENTITY),
            (
                TryoutError::ExtractionFailed(ExtractionError::NoImage),
                StatusCode::NOT_FOUND,
            ),
            (
                TryoutError::ExtractionFailed(ExtractionError::InvalidUrl("x".into())),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_generation_error_carries_model_text() {
        let err = ApiError::from(TryoutError::GenerationFailed(GenerationError::TextOnly(
            "cannot edit this photo".to_string(),
        )));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.text.as_deref(), Some("cannot edit this photo"));
    }
}
