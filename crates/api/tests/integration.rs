//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server,
//! backed by the in-memory task store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use siren_api::routes::create_router;
use siren_api::state::AppState;
use siren_common::types::WebhookTask;
use siren_notifier::{InMemoryTaskStore, Notifier, NotifierConfig, NotifierHandle, TaskStore};

// ============================================================
// Helpers
// ============================================================

/// Notifier with no standing workers, so queued tasks stay visible.
fn start_notifier(store: Arc<InMemoryTaskStore>) -> NotifierHandle {
    let config = NotifierConfig {
        webhook_url: "http://127.0.0.1:9/".to_string(),
        min_workers: 0,
        max_workers: 4,
        autoscale_interval: Duration::from_secs(3600),
        dequeue_timeout: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(2),
        ..NotifierConfig::default()
    };
    Notifier::start(store, config).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================
// Health
// ============================================================

#[tokio::test]
async fn test_health_reports_delivery_stats() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = start_notifier(store.clone());
    store
        .schedule_delayed(&WebhookTask::new(1, 1, 0.0, 0.0), i64::MAX)
        .await
        .unwrap();

    let app = create_router(AppState::new(notifier.clone()));
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "siren-api");
    assert_eq!(json["delivery"]["pending_tasks"], 0);
    assert_eq!(json["delivery"]["delayed_tasks"], 1);
    assert_eq!(json["delivery"]["dead_letter_tasks"], 0);
    assert_eq!(json["delivery"]["active_workers"], 0);

    notifier.shutdown().await;
}

#[tokio::test]
async fn test_health_degraded_after_store_closed() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = start_notifier(store);
    notifier.shutdown().await;

    let app = create_router(AppState::new(notifier));
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert!(json["delivery"].is_null());
}

// ============================================================
// Enqueue
// ============================================================

#[tokio::test]
async fn test_enqueue_task_lands_in_main_queue() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = start_notifier(store.clone());
    let app = create_router(AppState::new(notifier.clone()));

    let response = app
        .oneshot(post_json(
            "/api/webhooks/tasks",
            serde_json::json!({"incident_id": 3, "user_id": 9, "x": 55.5, "y": 37.25}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["queued"], true);

    let queued = store.main_entries().await;
    assert_eq!(queued, vec![WebhookTask::new(3, 9, 55.5, 37.25)]);

    notifier.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_rejects_malformed_task() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = start_notifier(store.clone());
    let app = create_router(AppState::new(notifier.clone()));

    let response = app
        .oneshot(post_json(
            "/api/webhooks/tasks",
            serde_json::json!({"user_id": 9, "x": "east"}),
        ))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    assert_eq!(store.queue_length().await.unwrap(), 0);

    notifier.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_during_shutdown_is_unavailable() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = start_notifier(store);
    notifier.shutdown().await;

    let app = create_router(AppState::new(notifier));
    let response = app
        .oneshot(post_json(
            "/api/webhooks/tasks",
            serde_json::json!({"incident_id": 1, "user_id": 1, "x": 0.0, "y": 0.0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(body_json(response).await["error"].is_string());
}

// ============================================================
// Dead letters
// ============================================================

#[tokio::test]
async fn test_list_dead_letters() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = start_notifier(store.clone());
    for i in 0..3 {
        let mut task = WebhookTask::new(i, 1, 0.0, 0.0);
        task.retry_count = 5;
        store.push_dlq(&task).await.unwrap();
    }

    let app = create_router(AppState::new(notifier.clone()));
    let response = app
        .clone()
        .oneshot(get("/api/webhooks/dead-letters"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let tasks = json.as_array().unwrap();
    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[0]["incident_id"], 0);
    assert_eq!(tasks[0]["retries"], 5);

    let response = app
        .oneshot(get("/api/webhooks/dead-letters?limit=2"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);

    notifier.shutdown().await;
}

#[tokio::test]
async fn test_list_dead_letters_rejects_bad_limit() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = start_notifier(store);
    let app = create_router(AppState::new(notifier.clone()));

    let response = app
        .oneshot(get("/api/webhooks/dead-letters?limit=lots"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    notifier.shutdown().await;
}
