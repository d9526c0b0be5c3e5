use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mirror_tryout::{
    config::AppConfig,
    db,
    models::job::JobStatus,
    services::{
        camera::HttpCamera,
        generation::GeminiClient,
        storage::{ImageStore, InlineImageStore, R2Client},
    },
    shutdown,
    tryout::{CaptureHandler, JobWatcher},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting capture station");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let store = db::open_store(&config)
        .await
        .expect("Failed to open job store");

    let camera_url = config
        .camera_snapshot_url
        .as_deref()
        .expect("CAMERA_SNAPSHOT_URL must be set");
    let camera = HttpCamera::new(camera_url).expect("Failed to initialize camera client");

    let api_key = config
        .gemini_api_key
        .clone()
        .expect("GEMINI_API_KEY must be set");
    let generator = GeminiClient::new(api_key, config.gemini_model.clone())
        .with_base_url(config.gemini_base_url.clone());

    let images: Arc<dyn ImageStore> = match config.r2() {
        Some(r2) => {
            tracing::info!(bucket = r2.bucket, "Storing images in R2");
            Arc::new(
                R2Client::new(
                    r2.bucket,
                    r2.endpoint,
                    r2.access_key,
                    r2.secret_key,
                    r2.public_base_url,
                )
                .expect("Failed to initialize R2 client"),
            )
        }
        None => {
            tracing::info!("R2 not configured, storing images inline on jobs");
            Arc::new(InlineImageStore)
        }
    };

    let stop = shutdown::signal_channel();
    let (jobs, watcher) = JobWatcher::new(store.clone(), JobStatus::WaitingPhoto, config.poll_interval())
        .spawn(stop.clone());

    let handler = CaptureHandler::new(store, Arc::new(camera), images, Arc::new(generator))
        .with_countdown(config.capture_countdown());

    handler.run(jobs, stop).await;
    watcher.abort();
}
