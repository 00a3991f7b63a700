//! In-memory store backend.
//!
//! Mirrors the Redis semantics the worker relies on (blocking pop, key expiry)
//! so the job engine and consumer loop can run without a Redis server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::backend::{KeyValueStore, ListQueue};
use crate::error::{QueueError, QueueResult};

#[derive(Default)]
struct Inner {
    values: HashMap<String, (String, Instant)>,
    lists: HashMap<String, VecDeque<String>>,
}

/// Shared in-memory backend. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    pushed: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every operation fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live (non-expired) keys.
    pub async fn key_count(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        inner.values.values().filter(|(_, exp)| *exp > now).count()
    }

    /// Remaining time-to-live of a key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        inner
            .values
            .get(key)
            .and_then(|(_, exp)| exp.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::connection_failed("memory backend marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryBackend {
    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        match inner.values.get(key) {
            Some((value, exp)) if *exp > now => Ok(Some(value.clone())),
            Some(_) => {
                inner.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        self.check_available()?;
        let expires = Instant::now() + ttl.max(Duration::from_secs(1));
        let mut inner = self.inner.lock().await;
        inner.values.insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn ping(&self) -> QueueResult<()> {
        self.check_available()
    }
}

#[async_trait]
impl ListQueue for MemoryBackend {
    async fn blpop(&self, key: &str, timeout: Duration) -> QueueResult<Option<String>> {
        self.check_available()?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register before checking so a concurrent push is not missed
            let pushed = self.pushed.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(value) = inner.lists.get_mut(key).and_then(VecDeque::pop_front) {
                    return Ok(Some(value));
                }
            }
            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> QueueResult<()> {
        self.check_available()?;
        {
            let mut inner = self.inner.lock().await;
            inner
                .lists
                .entry(key.to_string())
                .or_default()
                .push_back(value.to_string());
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner.lists.get(key).map_or(0, |l| l.len() as u64))
    }
}
