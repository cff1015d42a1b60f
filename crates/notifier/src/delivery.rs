//! Outbound webhook calls.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use siren_common::types::WebhookTask;

use crate::error::{DeliveryError, NotifierError};

/// Idle keep-alive connections kept per webhook host.
const MAX_IDLE_PER_HOST: usize = 20;
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP client shared by every delivery worker.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: Client,
    url: Url,
}

impl WebhookClient {
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self, NotifierError> {
        let url = Url::parse(webhook_url).map_err(|e| {
            NotifierError::Config(format!("invalid webhook URL {:?}: {}", webhook_url, e))
        })?;

        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build()?;

        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST the task as JSON. Any status below 400 counts as delivered.
    ///
    /// The call is bounded by the client timeout only; it is never aborted by
    /// worker cancellation.
    pub async fn deliver(&self, task: &WebhookTask) -> Result<StatusCode, DeliveryError> {
        let response = self.http.post(self.url.clone()).json(task).send().await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;

    type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn spawn_receiver(status: AxumStatus) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(captured): State<Captured>,
                          headers: HeaderMap,
                          body: axum::Json<serde_json::Value>| async move {
                        let content_type = headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        captured.lock().unwrap().push((content_type, body.0));
                        status
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), captured)
    }

    #[tokio::test]
    async fn test_deliver_posts_task_json() {
        let (url, captured) = spawn_receiver(AxumStatus::OK).await;
        let client = WebhookClient::new(&url, Duration::from_secs(5)).unwrap();

        let mut task = WebhookTask::new(11, 22, 1.25, -3.5);
        task.retry_count = 2;
        let status = client.deliver(&task).await.unwrap();
        assert_eq!(status, StatusCode::OK);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0.as_deref(), Some("application/json"));
        assert_eq!(
            captured[0].1,
            serde_json::json!({"incident_id": 11, "user_id": 22, "x": 1.25, "y": -3.5, "retries": 2})
        );
    }

    #[tokio::test]
    async fn test_accepted_status_is_success() {
        let (url, _) = spawn_receiver(AxumStatus::ACCEPTED).await;
        let client = WebhookClient::new(&url, Duration::from_secs(5)).unwrap();
        let status = client.deliver(&WebhookTask::new(1, 1, 0.0, 0.0)).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_error_status_is_failure() {
        let (url, _) = spawn_receiver(AxumStatus::INTERNAL_SERVER_ERROR).await;
        let client = WebhookClient::new(&url, Duration::from_secs(5)).unwrap();
        let err = client
            .deliver(&WebhookTask::new(1, 1, 0.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Status(500)));
    }

    #[tokio::test]
    async fn test_client_error_status_is_failure() {
        let (url, _) = spawn_receiver(AxumStatus::BAD_REQUEST).await;
        let client = WebhookClient::new(&url, Duration::from_secs(5)).unwrap();
        let err = client
            .deliver(&WebhookTask::new(1, 1, 0.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Status(400)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_failure() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            WebhookClient::new(&format!("http://{}/hook", addr), Duration::from_secs(2)).unwrap();
        let err = client
            .deliver(&WebhookTask::new(1, 1, 0.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = WebhookClient::new("::nope::", Duration::from_secs(1));
        assert!(matches!(result, Err(NotifierError::Config(_))));
    }
}
