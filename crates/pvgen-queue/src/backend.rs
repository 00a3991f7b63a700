//! Store backends.
//!
//! The worker only needs two capabilities from the shared store: a list it can
//! block-pop from, and a key-value map with per-key expiry.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::QueueResult;

/// Key-value map with per-key expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> QueueResult<Option<String>>;

    /// Write a value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()>;

    /// Connectivity check.
    async fn ping(&self) -> QueueResult<()>;
}

/// FIFO list with blocking left-pop.
#[async_trait]
pub trait ListQueue: Send + Sync {
    /// Pop the head of `key`, waiting up to `timeout` for an entry.
    async fn blpop(&self, key: &str, timeout: Duration) -> QueueResult<Option<String>>;

    /// Append to the tail of `key`.
    async fn rpush(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Number of entries in `key`.
    async fn llen(&self, key: &str) -> QueueResult<u64>;
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
}

impl RedisBackend {
    /// Create a backend for a Redis URL. Does not connect yet.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl KeyValueStore for RedisBackend {
    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        // Redis rejects an expiry of zero
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, secs).await?;
        Ok(())
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl ListQueue for RedisBackend {
    async fn blpop(&self, key: &str, timeout: Duration) -> QueueResult<Option<String>> {
        // Dedicated connection: BLPOP holds it for the whole wait
        let mut conn = self.connection().await?;
        let popped: Option<(String, String)> = conn.blpop(key, timeout.as_secs_f64()).await?;

        if popped.is_none() {
            debug!("No entry on {} within {:?}", key, timeout);
        }
        Ok(popped.map(|(_, value)| value))
    }

    async fn rpush(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }
}
