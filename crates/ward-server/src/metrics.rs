//! Prometheus metrics for the ward server.
//!
//! Broadcast and retry counters are emitted from `ward-core` (see `ward_core::metrics`); this
//! module installs the
//! recorder, renders `/metrics` and covers the HTTP and socket gauges.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Socket metrics
    pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
    pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics is served by the app itself.
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format, `None` if the recorder is not installed.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    let normalized_path = normalize_path(path);

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => normalized_path.clone(),
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => normalized_path
    )
    .record(duration.as_secs_f64());
}

pub fn socket_opened(role: &'static str) {
    gauge!(names::WS_CONNECTIONS_ACTIVE, "role" => role).increment(1.0);
}

pub fn socket_closed(role: &'static str) {
    gauge!(names::WS_CONNECTIONS_ACTIVE, "role" => role).decrement(1.0);
}

pub fn socket_rejected(reason: &'static str) {
    counter!(names::WS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Collapse ids and access tokens so label cardinality stays bounded.
///
/// `/api/v1/exam-schedules/42` becomes `/api/v1/exam-schedules/{id}` and every
/// `/ws/<token>` becomes `/ws/{token}`.
fn normalize_path(path: &str) -> String {
    let mut normalized: Vec<&str> = Vec::new();
    for part in path.split('/') {
        let replacement = match normalized.last() {
            Some(&"ws") if !part.is_empty() => Some("{token}"),
            _ if is_likely_id(part) => Some("{id}"),
            _ => None,
        };
        normalized.push(replacement.unwrap_or(part));
    }
    normalized.join("/")
}

/// Numeric ids, UUIDs and long opaque tokens.
fn is_likely_id(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4 {
        return true;
    }
    s.len() > 16 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
