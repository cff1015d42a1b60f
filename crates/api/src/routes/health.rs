//! Health check endpoint, reporting delivery load.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health: Liveness plus delivery statistics.
///
/// Still answers 200 when the task store is unreachable, with status
/// `degraded` and no statistics.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (status, delivery) = match state.notifier.stats().await {
        Ok(stats) => ("ok", serde_json::to_value(stats).ok()),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to collect delivery stats");
            ("degraded", None)
        }
    };

    Json(json!({
        "status": status,
        "service": "siren-api",
        "version": env!("CARGO_PKG_VERSION"),
        "delivery": delivery
    }))
}
