//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, status
//! - `http_request_duration_seconds` (histogram): latency by method
//!
//! # Design Decisions
//! - The Prometheus recorder is process-wide; it is installed at most once
//! - Recording is skipped entirely when the metrics endpoint is disabled

use std::sync::OnceLock;
use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global Prometheus recorder on first use.
///
/// Returns `None` if another recorder already owns the process.
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Prometheus recorder");
                None
            }
        })
        .clone()
}

/// Record one finished request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("http_request_duration_seconds", "method" => method.to_string()).record(duration);
}

/// Middleware body for the `metrics` registry entry.
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    record_request(&method, response.status().as_u16(), start);
    response
}
