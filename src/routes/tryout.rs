use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::closet::ClosetEntry;
use crate::models::job::TryoutJob;
use crate::models::tryout::{ListJobsQuery, SubmitClothingRequest};
use crate::tryout::{ClothingSource, TryoutError};

const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// POST /api/tryout/jobs: create a pending job.
pub async fn create_job(State(state): State<AppState>) -> Result<(StatusCode, Json<TryoutJob>), ApiError> {
    let job = state.store.create_job().await.map_err(TryoutError::from)?;
    metrics::counter!("tryout_jobs_created_total").increment(1);
    tracing::info!(job_id = %job.id, "Try-out job created");
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/tryout/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TryoutJob>, ApiError> {
    state
        .store
        .get_job(id)
        .await
        .map_err(TryoutError::from)?
        .map(Json)
        .ok_or_else(|| TryoutError::NotFound(id).into())
}

/// GET /api/tryout/jobs?status=…&limit=…: jobs in one status, oldest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<TryoutJob>>, ApiError> {
    let jobs = state
        .store
        .list_by_status(query.status, None, clamp_limit(query.limit))
        .await
        .map_err(TryoutError::from)?;
    Ok(Json(jobs))
}

/// POST /api/tryout/jobs/{id}/clothing: submit a product page URL.
pub async fn submit_clothing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitClothingRequest>,
) -> Result<Json<TryoutJob>, ApiError> {
    request.validate()?;
    let job = state
        .submissions
        .submit(id, ClothingSource::Url(request.url))
        .await?;
    Ok(Json(job))
}

/// POST /api/tryout/jobs/{id}/clothing/upload: multipart `image` field.
pub async fn upload_clothing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<TryoutJob>, ApiError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("Invalid multipart body").with_details(e))?
    {
        if field.name() == Some("image") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request("Invalid multipart body").with_details(e))?;
            image = Some(bytes.to_vec());
        }
    }
    let image = image.ok_or_else(|| ApiError::bad_request("Missing image field"))?;

    let job = state
        .submissions
        .submit(id, ClothingSource::Upload(image))
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ClosetQuery {
    pub limit: Option<i64>,
}

/// GET /api/tryout/closet: saved looks, newest first.
pub async fn list_closet(
    State(state): State<AppState>,
    Query(query): Query<ClosetQuery>,
) -> Result<Json<Vec<ClosetEntry>>, ApiError> {
    let entries = state
        .store
        .list_closet(clamp_limit(query.limit))
        .await
        .map_err(TryoutError::from)?;
    Ok(Json(entries))
}
