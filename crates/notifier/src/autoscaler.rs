//! Backlog-driven autoscaling of delivery workers.
//!
//! Scale-up is immediate: the full gap to the target is spawned in one tick.
//! Scale-down is damped to `scale_down_step` workers per tick so a backlog
//! hovering around a threshold does not make the pool thrash.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::pool::WorkerPool;
use crate::store::TaskStore;

/// Worker-count bounds and scaling ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Backlog one worker is expected to absorb
    pub batch_size: usize,
    /// Workers retired per tick at most
    pub scale_down_step: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    Up(usize),
    Down(usize),
    Hold,
}

impl ScalingPolicy {
    /// Desired worker count for a backlog, within `[min_workers, max_workers]`.
    /// A non-empty backlog always gets at least one worker.
    pub fn target(&self, backlog: u64) -> usize {
        if backlog == 0 {
            return self.min_workers;
        }
        let wanted = (backlog / self.batch_size.max(1) as u64).max(1);
        let wanted = usize::try_from(wanted).unwrap_or(usize::MAX);
        wanted.clamp(self.min_workers.max(1), self.max_workers.max(1))
    }

    /// Step from `current` live workers towards the target for `backlog`.
    pub fn plan(&self, backlog: u64, current: usize) -> ScaleAction {
        let target = self.target(backlog);
        if target > current {
            ScaleAction::Up(target - current)
        } else if target < current {
            ScaleAction::Down((current - target).min(self.scale_down_step))
        } else {
            ScaleAction::Hold
        }
    }
}

/// Owns the worker pool and resizes it on every tick.
pub(crate) struct Autoscaler {
    pool: Arc<WorkerPool>,
    store: Arc<dyn TaskStore>,
    policy: ScalingPolicy,
    interval: Duration,
}

impl Autoscaler {
    pub(crate) fn new(
        pool: Arc<WorkerPool>,
        store: Arc<dyn TaskStore>,
        policy: ScalingPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            policy,
            interval,
        }
    }

    /// Bring the pool up to `min_workers`. Called once, before [`run`](Self::run).
    pub(crate) fn start_minimum(&self) {
        let missing = self.policy.min_workers.saturating_sub(self.pool.live_workers());
        for _ in 0..missing {
            if self.pool.spawn_worker().is_none() {
                break;
            }
        }
    }

    /// Rescale every tick until `cancel` fires.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            min_workers = self.policy.min_workers,
            max_workers = self.policy.max_workers,
            batch_size = self.policy.batch_size,
            "Autoscaler started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!("Autoscaler stopped");
    }

    /// One scaling decision. Returns `None` when the backlog could not be read.
    pub(crate) async fn tick(&self) -> Option<ScaleAction> {
        let backlog = match self.store.queue_length().await {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read queue length, skipping autoscale tick");
                return None;
            }
        };

        let current = self.pool.live_workers();
        let action = self.policy.plan(backlog, current);

        match action {
            ScaleAction::Up(count) => {
                tracing::info!(
                    count,
                    backlog,
                    total = current + count,
                    "Scaling up workers"
                );
                for _ in 0..count {
                    if self.pool.spawn_worker().is_none() {
                        tracing::debug!("Pool is shutting down, scale-up abandoned");
                        break;
                    }
                }
            }
            ScaleAction::Down(count) => {
                tracing::info!(
                    count,
                    backlog,
                    total = current - count,
                    "Scaling down workers"
                );
                for _ in 0..count {
                    self.pool.retire_worker();
                }
            }
            ScaleAction::Hold => {}
        }

        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_util::task::TaskTracker;

    use siren_common::types::WebhookTask;

    use crate::delivery::WebhookClient;
    use crate::retry::FailureHandler;
    use crate::store::InMemoryTaskStore;
    use crate::worker::WorkerContext;

    fn policy(min: usize, max: usize) -> ScalingPolicy {
        ScalingPolicy {
            min_workers: min,
            max_workers: max,
            batch_size: 30,
            scale_down_step: 5,
        }
    }

    #[test]
    fn test_target_empty_backlog_is_minimum() {
        assert_eq!(policy(2, 20).target(0), 2);
    }

    #[test]
    fn test_target_small_backlog_is_minimum() {
        assert_eq!(policy(2, 20).target(29), 2);
    }

    #[test]
    fn test_target_with_zero_minimum_covers_small_backlog() {
        assert_eq!(policy(0, 10).target(0), 0);
        assert_eq!(policy(0, 10).target(1), 1);
        assert_eq!(policy(0, 10).target(29), 1);
        assert_eq!(policy(0, 10).plan(29, 0), ScaleAction::Up(1));
    }

    #[test]
    fn test_target_follows_batch_ratio() {
        assert_eq!(policy(2, 20).target(300), 10);
    }

    #[test]
    fn test_target_clamped_to_maximum() {
        assert_eq!(policy(2, 20).target(900), 20);
        assert_eq!(policy(2, 20).target(u64::MAX), 20);
    }

    #[test]
    fn test_plan_scales_up_full_gap() {
        assert_eq!(policy(2, 200).plan(3_000, 2), ScaleAction::Up(98));
    }

    #[test]
    fn test_plan_scale_down_is_capped() {
        assert_eq!(policy(2, 20).plan(0, 20), ScaleAction::Down(5));
        assert_eq!(policy(2, 20).plan(0, 4), ScaleAction::Down(2));
        assert_eq!(policy(2, 20).plan(0, 2), ScaleAction::Hold);
    }

    #[test]
    fn test_plan_stays_within_bounds() {
        let p = policy(3, 17);
        for backlog in [0u64, 1, 29, 30, 89, 90, 300, 509, 510, 10_000] {
            let mut current = p.min_workers;
            for _ in 0..10 {
                current = match p.plan(backlog, current) {
                    ScaleAction::Up(n) => current + n,
                    ScaleAction::Down(n) => current - n,
                    ScaleAction::Hold => current,
                };
                assert!(current >= p.min_workers && current <= p.max_workers);
            }
        }
    }

    /// The autoscaler reads its backlog from `store`; workers pop from a
    /// separate empty store so the backlog stays put during a test.
    fn autoscaler(store: Arc<InMemoryTaskStore>, policy: ScalingPolicy) -> (Autoscaler, CancellationToken) {
        let worker_store = Arc::new(InMemoryTaskStore::new());
        let client = WebhookClient::new("http://127.0.0.1:9/", Duration::from_secs(1)).unwrap();
        let failures = FailureHandler::new(worker_store.clone(), 5, 1, Duration::from_secs(1));
        let ctx = Arc::new(WorkerContext::new(
            worker_store,
            client,
            failures,
            Duration::from_millis(20),
        ));
        let shutdown = CancellationToken::new();
        let pool = Arc::new(WorkerPool::new(ctx, TaskTracker::new(), shutdown.clone()));
        (
            Autoscaler::new(pool, store, policy, Duration::from_secs(1)),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_tick_damps_scale_down() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (scaler, shutdown) = autoscaler(store, policy(2, 20));
        for _ in 0..20 {
            scaler.pool.spawn_worker();
        }

        assert_eq!(scaler.tick().await, Some(ScaleAction::Down(5)));
        assert_eq!(scaler.pool.live_workers(), 15);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_tick_scales_up_to_max() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (scaler, shutdown) = autoscaler(store.clone(), policy(2, 20));

        for i in 0..900 {
            store.push_main(&WebhookTask::new(i, 1, 0.0, 0.0)).await.unwrap();
        }
        scaler.start_minimum();
        assert_eq!(scaler.pool.live_workers(), 2);

        assert_eq!(scaler.tick().await, Some(ScaleAction::Up(18)));
        assert_eq!(scaler.pool.live_workers(), 20);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_no_workers_spawned_once_shutdown_begins() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (scaler, shutdown) = autoscaler(store.clone(), policy(2, 20));
        for i in 0..900 {
            store.push_main(&WebhookTask::new(i, 1, 0.0, 0.0)).await.unwrap();
        }

        shutdown.cancel();
        scaler.pool.retire_all();
        scaler.start_minimum();
        scaler.tick().await;
        assert_eq!(scaler.pool.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_run_does_not_respawn_after_shutdown() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (scaler, shutdown) = autoscaler(store, policy(3, 20));
        let pool = Arc::clone(&scaler.pool);

        scaler.start_minimum();
        assert_eq!(pool.live_workers(), 3);

        // Shutdown lands before the spawned loop is first polled
        shutdown.cancel();
        pool.retire_all();
        scaler.run(shutdown.child_token()).await;
        assert_eq!(pool.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_tick_skipped_when_store_unreadable() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (scaler, shutdown) = autoscaler(store.clone(), policy(2, 20));
        scaler.start_minimum();
        store.close().await;

        assert_eq!(scaler.tick().await, None);
        assert_eq!(scaler.pool.live_workers(), 2);

        shutdown.cancel();
    }
}
