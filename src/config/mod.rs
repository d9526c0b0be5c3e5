use serde::Deserialize;
use std::time::Duration;

use crate::services::generation::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Which `JobStore` implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    /// In-process store for local development. Not shared between processes.
    Memory,
}

/// Settings shared by the API server, the capture station and the result display.
/// Each process reads only the fields it needs.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string. Required for the postgres backend.
    pub database_url: Option<String>,

    /// Redis connection string for the shared rate limiter.
    pub redis_url: Option<String>,

    /// Gemini API key. Without it the generate endpoint answers 500.
    pub gemini_api_key: Option<String>,

    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    /// Shared secret expected in `x-mirror-secret` on voice commands.
    pub voice_shared_secret: Option<String>,

    /// HTTP snapshot URL of the mirror camera.
    pub camera_snapshot_url: Option<String>,

    /// Snapshot URL polled for nod/shake gestures during confirmation.
    pub gesture_camera_url: Option<String>,

    #[serde(default = "default_capture_countdown_secs")]
    pub capture_countdown_secs: u64,

    #[serde(default = "default_presentation_secs")]
    pub presentation_secs: u64,

    #[serde(default = "default_confirmation_secs")]
    pub confirmation_secs: u64,

    #[serde(default = "default_true")]
    pub confirm_results: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How far back the display looks for completed jobs at startup.
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,

    #[serde(default = "default_shown_ids_path")]
    pub shown_ids_path: String,

    #[serde(default = "default_shown_ids_capacity")]
    pub shown_ids_capacity: usize,

    /// Directory the kiosk display writes results into.
    #[serde(default = "default_display_output_path")]
    pub display_output_path: String,

    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// R2 bucket name. Images are stored inline on the job when unset.
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// Public base URL objects are served from.
    pub r2_public_base_url: Option<String>,
}

/// Complete R2 settings, when all of them are present.
#[derive(Debug, Clone, Copy)]
pub struct R2Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub public_base_url: &'a str,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Postgres
}

fn default_gemini_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_gemini_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_capture_countdown_secs() -> u64 {
    5
}

fn default_presentation_secs() -> u64 {
    20
}

fn default_confirmation_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_recent_window_secs() -> u64 {
    300
}

fn default_shown_ids_path() -> String {
    "data/shown_tryouts.json".to_string()
}

fn default_shown_ids_capacity() -> usize {
    100
}

fn default_display_output_path() -> String {
    "data/display".to_string()
}

fn default_rate_limit_max() -> u32 {
    100
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn capture_countdown(&self) -> Duration {
        Duration::from_secs(self.capture_countdown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.recent_window_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs.max(1))
    }

    pub fn r2(&self) -> Option<R2Settings<'_>> {
        Some(R2Settings {
            bucket: self.r2_bucket.as_deref()?,
            endpoint: self.r2_endpoint.as_deref()?,
            access_key: self.r2_access_key.as_deref()?,
            secret_key: self.r2_secret_key.as_deref()?,
            public_base_url: self.r2_public_base_url.as_deref()?,
        })
    }
}
