//! Task store port: the main queue, the delayed set and the dead-letter queue.
//!
//! Every component of the delivery subsystem coordinates exclusively through
//! this trait. A task instance lives in exactly one of the three collections
//! (or in flight with one worker) at any moment; `promote_ready` is the only
//! operation that moves entries between collections and it must do so
//! atomically.

mod memory;
mod redis_store;

pub use self::memory::InMemoryTaskStore;
pub use self::redis_store::{QueueKeys, RedisTaskStore};

use std::time::Duration;

use async_trait::async_trait;

use siren_common::types::WebhookTask;

use crate::error::StoreError;

/// Raw payload popped from the main queue, not yet decoded.
pub type RawTask = Vec<u8>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Append a task to the tail of the main queue.
    async fn push_main(&self, task: &WebhookTask) -> Result<(), StoreError>;

    /// Remove the head of the main queue, waiting at most `timeout`.
    /// Returns `None` if nothing arrived in time.
    async fn pop_main(&self, timeout: Duration) -> Result<Option<RawTask>, StoreError>;

    /// Append a task to the dead-letter queue.
    async fn push_dlq(&self, task: &WebhookTask) -> Result<(), StoreError>;

    /// Park a task in the delayed set until `eligible_at` (Unix seconds).
    /// Scheduling the same task twice yields two entries.
    async fn schedule_delayed(&self, task: &WebhookTask, eligible_at: i64)
    -> Result<(), StoreError>;

    /// Atomically move every delayed entry with score `<= cutoff` to the tail
    /// of the main queue. Returns the number of entries moved.
    async fn promote_ready(&self, cutoff: i64) -> Result<u64, StoreError>;

    async fn queue_length(&self) -> Result<u64, StoreError>;

    async fn delayed_count(&self) -> Result<u64, StoreError>;

    async fn dead_letter_count(&self) -> Result<u64, StoreError>;

    /// Oldest `limit` dead-lettered tasks, left in place.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<WebhookTask>, StoreError>;

    /// Release store connections. Every later call fails with `StoreError::Closed`.
    async fn close(&self);
}
