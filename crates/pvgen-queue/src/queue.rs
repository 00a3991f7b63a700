//! Work queue backed by a Redis list.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use pvgen_models::QueueEntry;

use crate::backend::{KeyValueStore, ListQueue, RedisBackend};
use crate::error::{QueueError, QueueResult};
use crate::status::JOB_STATUS_TTL_SECS;

/// List key the producer pushes render requests to.
pub const DEFAULT_QUEUE_KEY: &str = "bull:video generation:waiting";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// List key for pending jobs
    pub queue_key: String,
    /// Blocking pop timeout
    pub poll_interval: Duration,
    /// Retention of job status records
    pub status_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://redis:6379".to_string(),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            poll_interval: Duration::from_secs(5),
            status_ttl: Duration::from_secs(JOB_STATUS_TTL_SECS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    ///
    /// `REDIS_URL` wins over `REDIS_HOST`/`REDIS_PORT` when set.
    pub fn from_env() -> Self {
        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| {
            let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "redis".to_string());
            let port: u16 = std::env::var("REDIS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6379);
            format!("redis://{}:{}", host, port)
        });

        Self {
            redis_url,
            queue_key: std::env::var("QUEUE_KEY").unwrap_or_else(|_| DEFAULT_QUEUE_KEY.to_string()),
            poll_interval: Duration::from_secs(
                std::env::var("QUEUE_POLL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            status_ttl: Duration::from_secs(
                std::env::var("JOB_STATUS_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(JOB_STATUS_TTL_SECS),
            ),
        }
    }
}

/// Job queue client.
///
/// Entries are consumed destructively: a popped entry is gone from the store,
/// so each entry reaches exactly one worker.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn ListQueue>,
    queue_key: String,
    poll_interval: Duration,
}

impl JobQueue {
    /// Create a queue over any list backend.
    pub fn new(backend: Arc<dyn ListQueue>, config: &QueueConfig) -> Self {
        Self {
            backend,
            queue_key: config.queue_key.clone(),
            poll_interval: config.poll_interval,
        }
    }

    /// Create a Redis-backed queue from config.
    pub fn redis(config: &QueueConfig) -> QueueResult<Self> {
        let backend = RedisBackend::new(&config.redis_url)?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// The list key this queue consumes.
    pub fn key(&self) -> &str {
        &self.queue_key
    }

    /// Pop the next raw entry, waiting at most one poll interval.
    pub async fn pop(&self) -> QueueResult<Option<String>> {
        let raw = self.backend.blpop(&self.queue_key, self.poll_interval).await?;
        if let Some(raw) = &raw {
            debug!("Popped {} bytes from {}", raw.len(), self.queue_key);
        }
        Ok(raw)
    }

    /// Enqueue an entry (producer side).
    pub async fn push(&self, entry: &QueueEntry) -> QueueResult<()> {
        let payload = serde_json::to_string(entry)?;
        self.push_raw(&payload).await?;

        if let Some(id) = entry.job_id() {
            info!("Enqueued job {} on {}", id, self.queue_key);
        }
        Ok(())
    }

    /// Enqueue a raw payload as-is.
    pub async fn push_raw(&self, payload: &str) -> QueueResult<()> {
        self.backend
            .rpush(&self.queue_key, payload)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        self.backend.llen(&self.queue_key).await
    }
}

/// Verify the store answers before the worker starts consuming.
pub async fn check_connectivity(store: &dyn KeyValueStore) -> QueueResult<()> {
    store
        .ping()
        .await
        .map_err(|e| QueueError::connection_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn test_config() -> QueueConfig {
        QueueConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_push_then_pop_roundtrip() {
        let backend = MemoryBackend::new();
        let queue = JobQueue::new(Arc::new(backend), &test_config());

        queue.push(&QueueEntry::new("job-1", "x = 1")).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        let raw = queue.pop().await.unwrap().expect("entry");
        let entry = QueueEntry::from_json(&raw).unwrap();
        assert_eq!(entry.job_id().unwrap().as_str(), "job-1");
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pop_times_out_empty() {
        let queue = JobQueue::new(Arc::new(MemoryBackend::new()), &test_config());
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connectivity_check() {
        let backend = MemoryBackend::new();
        assert!(check_connectivity(&backend).await.is_ok());

        backend.set_unavailable(true);
        let err = check_connectivity(&backend).await.unwrap_err();
        assert!(matches!(err, QueueError::ConnectionFailed(_)));
    }

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.queue_key, "bull:video generation:waiting");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.status_ttl, Duration::from_secs(3600));
    }
}
