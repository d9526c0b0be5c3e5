//! Stateless helpers the mirror UI calls directly: page image extraction and
//! one-shot try-on generation.

use axum::extract::State;
use axum::Json;
use garde::Validate;
use std::time::Instant;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::tryout::{ExtractImageRequest, ExtractImageResponse, GenerateRequest, GenerateResponse};
use crate::tryout::TryoutError;

/// POST /api/tryout/extract-image
pub async fn extract_image(
    State(state): State<AppState>,
    Json(request): Json<ExtractImageRequest>,
) -> Result<Json<ExtractImageResponse>, ApiError> {
    request.validate()?;
    let image_url = state.extractor.extract(request.url.trim()).await?;
    Ok(Json(ExtractImageResponse { image_url }))
}

/// POST /api/tryout/generate
///
/// Results are never cached: identical inputs produce independent results.
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    request.validate()?;
    let generator = state
        .generator
        .clone()
        .ok_or_else(|| ApiError::internal("Image generation is not configured"))?;

    let person = state
        .resolver
        .resolve(&request.user_photo_url)
        .await
        .map_err(|e| ApiError::bad_request("Could not load user photo").with_details(e))?;
    let garment = state
        .resolver
        .resolve(&request.clothing_image_url)
        .await
        .map_err(|e| ApiError::bad_request("Could not load clothing image").with_details(e))?;

    let started = Instant::now();
    let result = generator.generate(&person, &garment).await;
    metrics::histogram!("tryout_generation_seconds").record(started.elapsed().as_secs_f64());

    let image = result.map_err(TryoutError::from)?;
    Ok(Json(GenerateResponse {
        image_data: image.to_base64(),
        mime_type: image.mime_type,
    }))
}
