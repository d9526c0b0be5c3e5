use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use mirror_tryout::{
    config::AppConfig,
    db,
    models::job::JobStatus,
    services::camera::HttpCamera,
    shutdown,
    tryout::{
        gesture::spawn_gesture_feed, ConfirmInput, FileDisplay, JobWatcher, PresentationTimings,
        ResultPresenter, ShownStore,
    },
};

const INPUT_BUFFER: usize = 32;
const GESTURE_FRAME_INTERVAL: Duration = Duration::from_millis(150);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting result display");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let started_at = Utc::now();

    let store = db::open_store(&config)
        .await
        .expect("Failed to open job store");

    let shown = ShownStore::open(&config.shown_ids_path, config.shown_ids_capacity)
        .await
        .expect("Failed to open shown-id store");

    let display = Arc::new(FileDisplay::new(&config.display_output_path));
    let timings = PresentationTimings {
        presentation: Duration::from_secs(config.presentation_secs),
        confirmation: Duration::from_secs(config.confirmation_secs),
        confirm: config.confirm_results,
    };

    let stop = shutdown::signal_channel();
    let (input_tx, inputs) = mpsc::channel(INPUT_BUFFER);

    // Console answers: y / n / empty line to dismiss.
    let console_tx = input_tx.clone();
    let console = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match ConfirmInput::parse_line(&line) {
                Some(input) => {
                    if console_tx.send(input).await.is_err() {
                        break;
                    }
                }
                None => tracing::debug!(line = %line, "Ignoring console input"),
            }
        }
    });

    let gestures = match config.gesture_camera_url.as_deref() {
        Some(url) => {
            let camera = HttpCamera::new(url).expect("Failed to initialize gesture camera client");
            Some(spawn_gesture_feed(
                Arc::new(camera),
                GESTURE_FRAME_INTERVAL,
                input_tx,
                stop.clone(),
            ))
        }
        None => {
            drop(input_tx);
            None
        }
    };

    let since = started_at
        - chrono::Duration::from_std(config.recent_window()).unwrap_or_else(|_| chrono::Duration::minutes(5));
    let (jobs, watcher) = JobWatcher::new(store.clone(), JobStatus::Completed, config.poll_interval())
        .since(since)
        .spawn(stop.clone());

    ResultPresenter::new(store, shown, display, timings)
        .run(jobs, inputs, stop)
        .await;

    watcher.abort();
    console.abort();
    if let Some(gestures) = gestures {
        // Ends on shutdown or once the presenter has dropped its input channel.
        let _ = tokio::time::timeout(Duration::from_secs(2), gestures).await;
    }
}
