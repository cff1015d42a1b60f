//! Failure handling: exponential backoff or dead-letter.

use std::sync::Arc;
use std::time::Duration;

use siren_common::types::WebhookTask;

use crate::error::StoreError;
use crate::store::TaskStore;

/// Delay before retry number `retry_count`: `2^retry_count * base_secs`.
///
/// Saturates instead of overflowing; `max_retries` keeps real values small.
pub fn backoff_delay_secs(retry_count: u32, base_secs: u64) -> u64 {
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    base_secs.saturating_mul(factor)
}

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Parked in the delayed set until `eligible_at`.
    Retry {
        retry_count: u32,
        delay_secs: u64,
        eligible_at: i64,
    },
    /// Retry budget exhausted; moved to the dead-letter queue.
    DeadLetter { retry_count: u32 },
}

/// Records the fate of failed tasks in the store.
#[derive(Clone)]
pub struct FailureHandler {
    store: Arc<dyn TaskStore>,
    max_retries: u32,
    base_delay_secs: u64,
    write_timeout: Duration,
}

impl FailureHandler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        max_retries: u32,
        base_delay_secs: u64,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            max_retries,
            base_delay_secs,
            write_timeout,
        }
    }

    /// Decide what to do with a task whose retry count has just become `retry_count`.
    pub fn decide(&self, retry_count: u32, now: i64) -> FailureDecision {
        if retry_count >= self.max_retries {
            return FailureDecision::DeadLetter { retry_count };
        }

        let delay_secs = backoff_delay_secs(retry_count, self.base_delay_secs);
        let eligible_at = now.saturating_add(i64::try_from(delay_secs).unwrap_or(i64::MAX));
        FailureDecision::Retry {
            retry_count,
            delay_secs,
            eligible_at,
        }
    }

    /// Count the failure against the task and persist the decision.
    ///
    /// The store write runs under its own timeout, never under the worker's
    /// cancellation, so the decision is recorded even during shutdown.
    pub async fn handle(&self, mut task: WebhookTask, now: i64) -> FailureDecision {
        task.retry_count = task.retry_count.saturating_add(1);
        let decision = self.decide(task.retry_count, now);

        match decision {
            FailureDecision::DeadLetter { retry_count } => {
                tracing::warn!(
                    incident_id = task.incident_id,
                    user_id = task.user_id,
                    retry_count,
                    "Delivery failed after max retries, moving task to dead-letter queue"
                );
                self.record(&task, "dead-letter", self.store.push_dlq(&task))
                    .await;
            }
            FailureDecision::Retry {
                retry_count,
                delay_secs,
                eligible_at,
            } => {
                let recorded = self
                    .record(
                        &task,
                        "retry scheduling",
                        self.store.schedule_delayed(&task, eligible_at),
                    )
                    .await;
                if recorded {
                    tracing::info!(
                        incident_id = task.incident_id,
                        retry_count,
                        delay_secs,
                        eligible_at,
                        "Task scheduled for retry"
                    );
                }
            }
        }

        decision
    }

    async fn record(
        &self,
        task: &WebhookTask,
        what: &str,
        write: impl Future<Output = Result<(), StoreError>>,
    ) -> bool {
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(
                    critical = true,
                    incident_id = task.incident_id,
                    retry_count = task.retry_count,
                    error = %e,
                    "Failed to record {} decision, task may be lost",
                    what
                );
                false
            }
            Err(_) => {
                tracing::error!(
                    critical = true,
                    incident_id = task.incident_id,
                    retry_count = task.retry_count,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Timed out recording {} decision, task may be lost",
                    what
                );
                false
            }
        }
    }
}
