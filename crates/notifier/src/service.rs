//! Lifecycle of the delivery subsystem.
//!
//! [`Notifier::start`] launches the retry scheduler and the autoscaler (which
//! launches the workers) under one [`TaskTracker`]. [`NotifierHandle::shutdown`]
//! cancels everything, waits for all of it to exit within the configured
//! timeout, and only then closes the task store, so retry and dead-letter
//! writes issued by draining workers still reach it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use siren_common::types::{DeliveryStats, WebhookTask};

use crate::autoscaler::{Autoscaler, ScalingPolicy};
use crate::config::NotifierConfig;
use crate::delivery::WebhookClient;
use crate::error::{NotifierError, StoreError};
use crate::pool::WorkerPool;
use crate::retry::FailureHandler;
use crate::scheduler::RetryScheduler;
use crate::store::TaskStore;
use crate::worker::WorkerContext;

pub struct Notifier;

impl Notifier {
    /// Validate `config`, then launch the scheduler and autoscaler.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        store: Arc<dyn TaskStore>,
        config: NotifierConfig,
    ) -> Result<NotifierHandle, NotifierError> {
        config.validate()?;

        let client = WebhookClient::new(&config.webhook_url, config.delivery_timeout)?;
        let failures = FailureHandler::new(
            Arc::clone(&store),
            config.max_retries,
            config.retry_base_delay_secs,
            config.store_write_timeout,
        );
        let ctx = Arc::new(WorkerContext::new(
            Arc::clone(&store),
            client,
            failures,
            config.dequeue_timeout,
        ));

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let pool = Arc::new(WorkerPool::new(ctx, tracker.clone(), shutdown.clone()));

        let policy = ScalingPolicy {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            batch_size: config.scale_batch_size,
            scale_down_step: config.scale_down_step,
        };
        let autoscaler = Autoscaler::new(
            Arc::clone(&pool),
            Arc::clone(&store),
            policy,
            config.autoscale_interval,
        );
        let scheduler = RetryScheduler::new(Arc::clone(&store), config.scheduler_interval);

        // Workers exist before this returns, so stats never report fewer
        // than `min_workers`.
        autoscaler.start_minimum();
        tracker.spawn(scheduler.run(shutdown.child_token()));
        tracker.spawn(autoscaler.run(shutdown.child_token()));

        tracing::info!(
            webhook_url = %config.webhook_url,
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            max_retries = config.max_retries,
            "Webhook notifier started"
        );

        Ok(NotifierHandle {
            inner: Arc::new(Inner {
                store,
                pool,
                tracker,
                shutdown,
                shutdown_timeout: config.shutdown_timeout,
            }),
        })
    }
}

struct Inner {
    store: Arc<dyn TaskStore>,
    pool: Arc<WorkerPool>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
}

/// Handle to a running notifier. Cheap to clone.
#[derive(Clone)]
pub struct NotifierHandle {
    inner: Arc<Inner>,
}

/// How shutdown went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `false` if the timeout elapsed before every task exited
    pub drained: bool,
    pub elapsed: Duration,
}

impl NotifierHandle {
    /// Queue a task for delivery. Never blocks on delivery itself.
    pub async fn enqueue(&self, task: &WebhookTask) -> Result<(), StoreError> {
        self.inner.store.push_main(task).await?;
        tracing::debug!(
            incident_id = task.incident_id,
            user_id = task.user_id,
            "Webhook task queued"
        );
        Ok(())
    }

    pub async fn stats(&self) -> Result<DeliveryStats, StoreError> {
        let store = &self.inner.store;
        Ok(DeliveryStats {
            pending_tasks: store.queue_length().await?,
            delayed_tasks: store.delayed_count().await?,
            dead_letter_tasks: store.dead_letter_count().await?,
            active_workers: self.inner.pool.live_workers(),
        })
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<WebhookTask>, StoreError> {
        self.inner.store.dead_letters(limit).await
    }

    pub fn active_workers(&self) -> usize {
        self.inner.pool.live_workers()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop every loop and worker, wait for them, then close the store.
    pub async fn shutdown(&self) -> ShutdownReport {
        let started = Instant::now();
        tracing::info!(
            active_workers = self.inner.pool.live_workers(),
            "Shutting down webhook notifier, waiting for workers to finish"
        );

        self.inner.shutdown.cancel();
        self.inner.pool.retire_all();
        self.inner.tracker.close();

        let drained =
            match tokio::time::timeout(self.inner.shutdown_timeout, self.inner.tracker.wait()).await
            {
                Ok(()) => {
                    tracing::info!("All workers exited cleanly");
                    true
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.inner.shutdown_timeout.as_millis() as u64,
                        still_running = self.inner.tracker.len(),
                        "Worker shutdown timed out, forcing shutdown"
                    );
                    false
                }
            };

        self.inner.store.close().await;

        ShutdownReport {
            drained,
            elapsed: started.elapsed(),
        }
    }
}
