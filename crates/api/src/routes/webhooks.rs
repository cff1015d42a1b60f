//! Webhook task ingress and dead-letter inspection.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use siren_common::error::AppError;
use siren_common::types::WebhookTask;

use crate::state::AppState;

const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;
const MAX_DEAD_LETTER_LIMIT: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhooks/tasks", post(enqueue_task))
        .route("/api/webhooks/dead-letters", get(list_dead_letters))
}

/// POST /api/webhooks/tasks: Queue a task for webhook delivery.
async fn enqueue_task(
    State(state): State<AppState>,
    Json(task): Json<WebhookTask>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if state.notifier.is_shutting_down() {
        return Err(AppError::Unavailable(
            "delivery subsystem is shutting down".to_string(),
        ));
    }

    state.notifier.enqueue(&task).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true }))))
}

#[derive(Debug, Deserialize)]
struct DeadLetterQuery {
    limit: Option<usize>,
}

/// GET /api/webhooks/dead-letters?limit=N: Oldest dead-lettered tasks.
async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<WebhookTask>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .min(MAX_DEAD_LETTER_LIMIT);

    let tasks = state.notifier.dead_letters(limit).await?;
    Ok(Json(tasks))
}
