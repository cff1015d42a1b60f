//! Delivery worker loop.
//!
//! Each iteration: bounded pop → decode → POST → classify. Failed attempts go
//! to the [`FailureHandler`]; undecodable payloads are dropped as poison pills.
//! Cancellation is checked between iterations only, so a task that has left
//! the main queue is always carried through to a recorded outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use siren_common::types::WebhookTask;

use crate::delivery::WebhookClient;
use crate::error::StoreError;
use crate::retry::{FailureDecision, FailureHandler};
use crate::store::TaskStore;

/// Pause after a failed pop so an unreachable store is not hammered.
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Bytes of an undecodable payload included in its log line.
const POISON_LOG_PREFIX: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of handling one popped payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered { status: u16 },
    Failed(FailureDecision),
    /// Payload could not be decoded and was discarded.
    Poison,
}

/// Everything a worker needs, shared by all workers of a pool.
pub struct WorkerContext {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) client: WebhookClient,
    pub(crate) failures: FailureHandler,
    pub(crate) dequeue_timeout: Duration,
}

impl WorkerContext {
    pub fn new(
        store: Arc<dyn TaskStore>,
        client: WebhookClient,
        failures: FailureHandler,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            store,
            client,
            failures,
            dequeue_timeout,
        }
    }

    /// Decode and deliver one payload taken off the main queue.
    pub async fn process(&self, worker_id: WorkerId, payload: &[u8]) -> AttemptOutcome {
        let task: WebhookTask = match serde_json::from_slice(payload) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(
                    worker_id = %worker_id,
                    error = %e,
                    payload_len = payload.len(),
                    payload = %poison_excerpt(payload),
                    "Poison pill in main queue, discarding payload"
                );
                return AttemptOutcome::Poison;
            }
        };

        match self.client.deliver(&task).await {
            Ok(status) => {
                tracing::info!(
                    worker_id = %worker_id,
                    incident_id = task.incident_id,
                    user_id = task.user_id,
                    status = status.as_u16(),
                    "Webhook delivered"
                );
                AttemptOutcome::Delivered {
                    status: status.as_u16(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    worker_id = %worker_id,
                    incident_id = task.incident_id,
                    retry_count = task.retry_count,
                    error = %e,
                    "Webhook delivery failed"
                );
                let decision = self.failures.handle(task, Utc::now().timestamp()).await;
                AttemptOutcome::Failed(decision)
            }
        }
    }
}

fn poison_excerpt(payload: &[u8]) -> String {
    let end = payload.len().min(POISON_LOG_PREFIX);
    let mut excerpt = String::from_utf8_lossy(&payload[..end]).into_owned();
    if payload.len() > end {
        excerpt.push_str("...");
    }
    excerpt
}

/// Worker loop. Returns once `cancel` is observed or the store is closed.
pub(crate) async fn run_worker(
    worker_id: WorkerId,
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker_id = %worker_id, "Worker started");

    while !cancel.is_cancelled() {
        // The pop is never raced against cancellation: dropping a BLPOP
        // mid-flight can lose a task the server already removed.
        let payload = match ctx.store.pop_main(ctx.dequeue_timeout).await {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(StoreError::Closed) => break,
            Err(e) => {
                tracing::warn!(worker_id = %worker_id, error = %e, "Failed to pop from main queue");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(POP_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        ctx.process(worker_id, &payload).await;
    }

    tracing::debug!(worker_id = %worker_id, "Worker stopped");
}
