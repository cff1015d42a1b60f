//! Retry scheduler: promotes due tasks from the delayed set to the main queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::store::TaskStore;

/// Sole mover of tasks from the delayed set back into the main queue.
pub struct RetryScheduler {
    store: Arc<dyn TaskStore>,
    interval: Duration,
}

impl RetryScheduler {
    pub fn new(store: Arc<dyn TaskStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Retry scheduler started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now().timestamp()).await {
                        tracing::error!(error = %e, "Failed to promote delayed tasks");
                    }
                }
            }
        }

        tracing::info!("Retry scheduler stopped");
    }

    /// Promote everything due at `now`.
    pub async fn tick(&self, now: i64) -> Result<u64, StoreError> {
        let moved = self.store.promote_ready(now).await?;
        if moved > 0 {
            tracing::info!(count = moved, "Moved delayed tasks to main queue");
        }
        Ok(moved)
    }
}
