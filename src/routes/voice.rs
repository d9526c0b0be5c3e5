use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use garde::Validate;
use std::net::SocketAddr;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::tryout::{VoiceCommand, VoiceCommandResponse};
use crate::tryout::TryoutError;

pub const SECRET_HEADER: &str = "x-mirror-secret";

/// Rate-limit key: first `x-forwarded-for` hop, else the peer address.
fn client_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.voice_secret.as_deref() else {
        return false;
    };
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|given| given == expected)
}

/// POST /api/voice: commands from the voice assistant.
pub async fn voice_command(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(command): Json<VoiceCommand>,
) -> Result<Json<VoiceCommandResponse>, ApiError> {
    let client = client_key(&headers, peer);
    match state.rate_limiter.check(&client).await {
        Ok(true) => {}
        Ok(false) => {
            metrics::counter!("tryout_rate_limited_total").increment(1);
            tracing::warn!(client = %client, "Voice command rate limited");
            return Err(ApiError::new(StatusCode::TOO_MANY_REQUESTS, "Too many requests"));
        }
        Err(e) => {
            tracing::warn!(
                backend = state.rate_limiter.backend(),
                error = %e,
                "Rate limiter unavailable, allowing request"
            );
        }
    }

    if !authorized(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    command.validate()?;

    match command.action.as_str() {
        "photo_tryout" | "tryout/photo" => {
            let job = state.store.create_job().await.map_err(TryoutError::from)?;
            metrics::counter!("tryout_jobs_created_total").increment(1);
            tracing::info!(job_id = %job.id, "Photo try-out started by voice");
            Ok(Json(VoiceCommandResponse {
                success: true,
                message: "Photo try-out started. Send the clothing link to continue.".to_string(),
                job_id: Some(job.id),
            }))
        }
        other => Err(ApiError::bad_request("unsupported action").with_details(other)),
    }
}
