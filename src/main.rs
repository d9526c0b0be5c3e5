use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mirror_tryout::{
    app_state::AppState,
    config::AppConfig,
    db, routes,
    services::{
        extraction::ImageExtractor,
        generation::{GeminiClient, ImageGenerator},
        rate_limit::{MemoryRateLimiter, RateLimiter, RedisRateLimiter},
    },
    shutdown,
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

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(store = %config.store_backend, "Initializing mirror-tryout server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    let store = db::open_store(&config)
        .await
        .expect("Failed to open job store");

    let extractor = ImageExtractor::new().expect("Failed to initialize image extractor");

    let generator: Option<Arc<dyn ImageGenerator>> = match &config.gemini_api_key {
        Some(key) if !key.is_empty() => Some(Arc::new(
            GeminiClient::new(key.clone(), config.gemini_model.clone())
                .with_base_url(config.gemini_base_url.clone()),
        )),
        _ => {
            tracing::warn!("GEMINI_API_KEY not set, generation endpoint disabled");
            None
        }
    };

    let rate_limiter: Arc<dyn RateLimiter> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Using Redis rate limiter");
            Arc::new(
                RedisRateLimiter::new(url, config.rate_limit_max, config.rate_limit_window())
                    .expect("Failed to initialize Redis rate limiter"),
            )
        }
        None => Arc::new(MemoryRateLimiter::new(
            config.rate_limit_max,
            config.rate_limit_window(),
        )),
    };

    if config.voice_shared_secret.is_none() {
        tracing::warn!("VOICE_SHARED_SECRET not set, voice commands will be rejected");
    }

    let state = AppState::new(
        store,
        Arc::new(extractor),
        generator,
        rate_limiter,
        config.voice_shared_secret.clone(),
    );

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .merge(
            Router::new()
                .route("/metrics", get(routes::metrics::prometheus_metrics))
                .with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let stop = shutdown::signal_channel();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown::wait(stop))
    .await
    .expect("Server error");

    tracing::info!("Server stopped");
}
