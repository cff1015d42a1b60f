//! In-process task store.
//!
//! Same semantics as the Redis store, with every operation applied under one
//! mutex so promotion is trivially atomic. Used by tests and for running the
//! notifier without Redis.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use siren_common::types::WebhookTask;

use super::{RawTask, TaskStore};
use crate::error::StoreError;

#[derive(Default)]
struct MemoryState {
    main: VecDeque<RawTask>,
    /// Keyed by (eligible_at, insertion sequence) so equal tasks stay distinct
    delayed: BTreeMap<(i64, u64), RawTask>,
    next_seq: u64,
    dead_letter: VecDeque<RawTask>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<MemoryState>,
    /// Wakes blocked `pop_main` callers when the main queue grows
    arrivals: Notify,
    closed: AtomicBool,
    rejected_after_close: AtomicU64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an arbitrary payload onto the main queue, bypassing encoding.
    pub async fn push_raw(&self, payload: impl Into<RawTask>) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.state.lock().await.main.push_back(payload.into());
        self.arrivals.notify_waiters();
        Ok(())
    }

    /// Snapshot of the delayed set as `(eligible_at, task)`, earliest first.
    pub async fn delayed_entries(&self) -> Vec<(i64, WebhookTask)> {
        let state = self.state.lock().await;
        state
            .delayed
            .iter()
            .filter_map(|((score, _), payload)| {
                serde_json::from_slice(payload)
                    .ok()
                    .map(|task| (*score, task))
            })
            .collect()
    }

    /// Snapshot of the main queue, head first. Undecodable entries are skipped.
    pub async fn main_entries(&self) -> Vec<WebhookTask> {
        let state = self.state.lock().await;
        state
            .main
            .iter()
            .filter_map(|payload| serde_json::from_slice(payload).ok())
            .collect()
    }

    /// Number of calls refused because the store had already been closed.
    pub fn rejected_after_close(&self) -> u64 {
        self.rejected_after_close.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            self.rejected_after_close.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn push_main(&self, task: &WebhookTask) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(task)?;
        self.push_raw(payload).await
    }

    async fn pop_main(&self, timeout: Duration) -> Result<Option<RawTask>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_open()?;

            // Register interest before checking the queue so a push between
            // the check and the wait is not missed.
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(payload) = self.state.lock().await.main.pop_front() {
                return Ok(Some(payload));
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn push_dlq(&self, task: &WebhookTask) -> Result<(), StoreError> {
        self.ensure_open()?;
        let payload = serde_json::to_vec(task)?;
        self.state.lock().await.dead_letter.push_back(payload);
        Ok(())
    }

    async fn schedule_delayed(
        &self,
        task: &WebhookTask,
        eligible_at: i64,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let payload = serde_json::to_vec(task)?;
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.delayed.insert((eligible_at, seq), payload);
        Ok(())
    }

    async fn promote_ready(&self, cutoff: i64) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let moved = {
            let mut state = self.state.lock().await;
            let ready = match cutoff.checked_add(1) {
                Some(bound) => {
                    let pending = state.delayed.split_off(&(bound, 0));
                    std::mem::replace(&mut state.delayed, pending)
                }
                None => std::mem::take(&mut state.delayed),
            };
            let moved = ready.len() as u64;
            state.main.extend(ready.into_values());
            moved
        };

        if moved > 0 {
            self.arrivals.notify_waiters();
        }
        Ok(moved)
    }

    async fn queue_length(&self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        Ok(self.state.lock().await.main.len() as u64)
    }

    async fn delayed_count(&self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        Ok(self.state.lock().await.delayed.len() as u64)
    }

    async fn dead_letter_count(&self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        Ok(self.state.lock().await.dead_letter.len() as u64)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<WebhookTask>, StoreError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        state
            .dead_letter
            .iter()
            .take(limit)
            .map(|payload| serde_json::from_slice(payload).map_err(StoreError::from))
            .collect()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.arrivals.notify_waiters();
    }
}
