use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::time::Instant;

use crate::handlers::AppState;

/// Liveness plus a database ping. 503 when the database is unreachable.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match db_result {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "up",
                "version": env!("CARGO_PKG_VERSION"),
                "checks": { "database": { "status": "up", "latency_ms": latency_ms } },
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "down",
                    "version": env!("CARGO_PKG_VERSION"),
                    "checks": { "database": { "status": "down", "latency_ms": latency_ms } },
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}
