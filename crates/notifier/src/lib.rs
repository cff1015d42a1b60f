//! Webhook delivery subsystem.
//!
//! Tasks produced elsewhere are queued in a shared [`TaskStore`] and POSTed to
//! a single webhook endpoint by an autoscaling pool of workers:
//!
//! - failed attempts are retried with exponential backoff via a delayed set
//! - tasks that exhaust their retries land in a dead-letter queue
//! - a scheduler promotes due retries back into the main queue
//! - the autoscaler sizes the pool from the main-queue backlog
//!
//! Delivery is at-least-once; there is no ordering between tasks.

pub mod autoscaler;
pub mod config;
pub mod delivery;
pub mod error;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod worker;

pub use config::NotifierConfig;
pub use error::{DeliveryError, NotifierError, StoreError};
pub use service::{Notifier, NotifierHandle, ShutdownReport};
pub use store::{InMemoryTaskStore, QueueKeys, RedisTaskStore, TaskStore};
