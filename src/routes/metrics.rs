use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the service records.
pub fn describe_metrics() {
    metrics::describe_counter!("tryout_jobs_created_total", "Try-out jobs created");
    metrics::describe_counter!(
        "tryout_clothing_submitted_total",
        "Clothing images resolved for pending jobs"
    );
    metrics::describe_counter!("tryout_jobs_completed_total", "Try-out jobs completed");
    metrics::describe_counter!("tryout_jobs_failed_total", "Try-out jobs that failed");
    metrics::describe_counter!(
        "tryout_claims_lost_total",
        "Jobs another station claimed first"
    );
    metrics::describe_histogram!(
        "tryout_generation_seconds",
        "Time spent in the image generation call"
    );
    metrics::describe_counter!("tryout_closet_entries_total", "Results saved to the closet");
    metrics::describe_counter!(
        "tryout_rate_limited_total",
        "Requests rejected by the rate limiter"
    );
}

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
