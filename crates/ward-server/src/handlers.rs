use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;

use crate::metrics::render_metrics;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Ward Realtime Server",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready once the app state is wired; reports live socket counts alongside.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.composer.registry();
    let body = json!({
        "status": "ready",
        "channels": registry.channel_count(),
        "connections": registry.total_connections(),
    });
    (StatusCode::OK, Json(body))
}

pub async fn metrics() -> impl IntoResponse {
    match render_metrics() {
        Some(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
