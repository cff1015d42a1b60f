//! Redis-backed task store.
//!
//! Layout:
//! - main queue: list `<prefix>:queue` (`RPUSH` / `BLPOP`)
//! - delayed set: sorted set `<prefix>:delayed`, scored by eligible time
//! - dead-letter queue: list `<prefix>:dlq`
//!
//! Sorted-set members are unique by value, so each delayed entry is stored as
//! `<token>|<json>` with a fresh token. Promotion runs as a Lua script, which
//! Redis executes without interleaving any other command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client, Script};
use uuid::Uuid;

use siren_common::types::WebhookTask;

use super::{RawTask, TaskStore};
use crate::error::StoreError;

/// KEYS[1] = delayed set, KEYS[2] = main queue, ARGV[1] = cutoff
static PROMOTE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
        for _, member in ipairs(members) do
            local sep = string.find(member, '|', 1, true)
            if sep then
                redis.call('RPUSH', KEYS[2], string.sub(member, sep + 1))
            else
                redis.call('RPUSH', KEYS[2], member)
            end
        end
        if #members > 0 then
            redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
        end
        return #members
        "#,
    )
});

/// Keep at most this many idle blocking connections around.
const MAX_IDLE_BLOCKING_CONNECTIONS: usize = 32;

/// Redis key names for the three collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub main: String,
    pub delayed: String,
    pub dead_letter: String,
}

impl QueueKeys {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            main: format!("{}:queue", prefix),
            delayed: format!("{}:delayed", prefix),
            dead_letter: format!("{}:dlq", prefix),
        }
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self::with_prefix("webhooks")
    }
}

pub struct RedisTaskStore {
    client: Client,
    /// Shared multiplexed connection for every non-blocking command.
    conn: ConnectionManager,
    /// Dedicated connections for `BLPOP`. A blocking command on the shared
    /// connection would stall every other caller behind it.
    blocking: Mutex<Vec<MultiplexedConnection>>,
    keys: QueueKeys,
    closed: AtomicBool,
}

impl RedisTaskStore {
    pub fn new(client: Client, conn: ConnectionManager) -> Self {
        Self::with_keys(client, conn, QueueKeys::default())
    }

    pub fn with_keys(client: Client, conn: ConnectionManager, keys: QueueKeys) -> Self {
        Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
            keys,
            closed: AtomicBool::new(false),
        }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.conn.clone())
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let idle = self
            .blocking
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match idle {
            Some(conn) => Ok(conn),
            None => Ok(self.client.get_multiplexed_async_connection().await?),
        }
    }

    fn checkin_blocking(&self, conn: MultiplexedConnection) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.blocking.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < MAX_IDLE_BLOCKING_CONNECTIONS {
            idle.push(conn);
        }
    }

    fn delayed_member(task: &WebhookTask) -> Result<String, StoreError> {
        let payload = serde_json::to_string(task)?;
        Ok(format!("{}|{}", Uuid::new_v4().simple(), payload))
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn push_main(&self, task: &WebhookTask) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(task)?;
        let mut conn = self.connection()?;
        conn.rpush::<_, _, ()>(&self.keys.main, payload).await?;
        Ok(())
    }

    async fn pop_main(&self, timeout: Duration) -> Result<Option<RawTask>, StoreError> {
        let mut conn = self.checkout_blocking().await?;

        // BLPOP replies with [key, value], or nil on timeout
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(&self.keys.main)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        self.checkin_blocking(conn);
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn push_dlq(&self, task: &WebhookTask) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(task)?;
        let mut conn = self.connection()?;
        conn.rpush::<_, _, ()>(&self.keys.dead_letter, payload)
            .await?;
        Ok(())
    }

    async fn schedule_delayed(
        &self,
        task: &WebhookTask,
        eligible_at: i64,
    ) -> Result<(), StoreError> {
        let member = Self::delayed_member(task)?;
        let mut conn = self.connection()?;
        conn.zadd::<_, _, _, ()>(&self.keys.delayed, member, eligible_at)
            .await?;
        Ok(())
    }

    async fn promote_ready(&self, cutoff: i64) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let moved: Option<u64> = PROMOTE_SCRIPT
            .key(&self.keys.delayed)
            .key(&self.keys.main)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved.unwrap_or(0))
    }

    async fn queue_length(&self) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let len: u64 = conn.llen(&self.keys.main).await?;
        Ok(len)
    }

    async fn delayed_count(&self) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let count: u64 = conn.zcard(&self.keys.delayed).await?;
        Ok(count)
    }

    async fn dead_letter_count(&self) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let len: u64 = conn.llen(&self.keys.dead_letter).await?;
        Ok(len)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<WebhookTask>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection()?;
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let raw: Vec<Vec<u8>> = conn.lrange(&self.keys.dead_letter, 0, stop).await?;

        raw.iter()
            .map(|payload| serde_json::from_slice(payload).map_err(StoreError::from))
            .collect()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.blocking
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::info!("Redis task store closed");
    }
}
