use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns server status.
///
/// Status reflects whether the database answers right now; cumulative
/// persistence failures are reported by `/metrics` instead.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let online = state.chat.hub.online_count().await as u64;
    let metrics = state.metrics.snapshot(online);

    let status = if state.db.ping().await {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        online_users: online,
        connections: metrics.connections.active,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let online = state.chat.hub.online_count().await as u64;
    Json(state.metrics.snapshot(online))
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 if the database is reachable
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    if state.db.ping().await {
        Json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected"
            })),
        )
            .into_response()
    }
}
