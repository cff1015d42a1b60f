//! Worker registry and pool.
//!
//! The registry maps each live worker to its cancellation token. All
//! mutations go through [`WorkerRegistry::mutate`], which holds the write
//! lock; the live count is the map size and is read under the read lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::worker::{WorkerContext, WorkerId, run_worker};

#[derive(Default)]
struct Registry {
    next_id: u64,
    workers: HashMap<WorkerId, CancellationToken>,
}

#[derive(Default)]
pub struct WorkerRegistry {
    inner: RwLock<Registry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut registry = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut registry)
    }

    /// Register a worker's cancellation token and hand out its id.
    pub fn register(&self, token: CancellationToken) -> WorkerId {
        self.mutate(|registry| {
            registry.next_id += 1;
            let id = WorkerId(registry.next_id);
            registry.workers.insert(id, token);
            id
        })
    }

    /// Like [`register`](Self::register), but refuses once `shutdown` has
    /// fired. The check runs under the write lock, so a registration either
    /// lands before a concurrent [`drain`](Self::drain) or is refused.
    pub fn register_unless_cancelled(
        &self,
        shutdown: &CancellationToken,
        token: CancellationToken,
    ) -> Option<WorkerId> {
        self.mutate(|registry| {
            if shutdown.is_cancelled() {
                return None;
            }
            registry.next_id += 1;
            let id = WorkerId(registry.next_id);
            registry.workers.insert(id, token);
            Some(id)
        })
    }

    /// Remove a specific worker. A no-op if it was already retired.
    pub fn unregister(&self, id: WorkerId) -> Option<CancellationToken> {
        self.mutate(|registry| registry.workers.remove(&id))
    }

    /// Remove an arbitrary registered worker. Workers are interchangeable.
    pub fn unregister_any(&self) -> Option<(WorkerId, CancellationToken)> {
        self.mutate(|registry| {
            let id = registry.workers.keys().next().copied()?;
            registry.workers.remove(&id).map(|token| (id, token))
        })
    }

    /// Remove every worker, returning their tokens.
    pub fn drain(&self) -> Vec<CancellationToken> {
        self.mutate(|registry| registry.workers.drain().map(|(_, token)| token).collect())
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .workers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawns and retires delivery workers. Only the autoscaler drives it.
pub(crate) struct WorkerPool {
    registry: Arc<WorkerRegistry>,
    ctx: Arc<WorkerContext>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub(crate) fn new(
        ctx: Arc<WorkerContext>,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: Arc::new(WorkerRegistry::new()),
            ctx,
            tracker,
            shutdown,
        }
    }

    /// Register and launch one worker. Its token is a child of the pool's
    /// shutdown token, so shutdown reaches every worker. Returns `None` once
    /// shutdown has begun.
    ///
    /// The worker removes its own registry entry when it exits, whether it
    /// was retired or stopped on its own.
    pub(crate) fn spawn_worker(&self) -> Option<WorkerId> {
        let token = self.shutdown.child_token();
        let id = self
            .registry
            .register_unless_cancelled(&self.shutdown, token.clone())?;

        let ctx = Arc::clone(&self.ctx);
        let registry = Arc::clone(&self.registry);
        self.tracker.spawn(async move {
            run_worker(id, ctx, token).await;
            registry.unregister(id);
        });
        Some(id)
    }

    /// Signal one worker to stop. It finishes its current attempt first.
    pub(crate) fn retire_worker(&self) -> Option<WorkerId> {
        let (id, token) = self.registry.unregister_any()?;
        token.cancel();
        tracing::debug!(worker_id = %id, "Worker retired");
        Some(id)
    }

    /// Signal every worker and empty the registry.
    pub(crate) fn retire_all(&self) -> usize {
        let tokens = self.registry.drain();
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    pub(crate) fn live_workers(&self) -> usize {
        self.registry.len()
    }
}
