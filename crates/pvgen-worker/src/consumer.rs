//! Queue consumer loop.
//!
//! Pops one entry at a time, hands it to the [`JobEngine`] and waits for the
//! job to finish before polling again. Infrastructure errors (unreadable
//! entries, store outages, crashed job tasks) are logged and followed by a
//! fixed backoff; the loop itself only stops on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pvgen_models::{JobId, JobStatus, QueueEntry};
use pvgen_queue::{check_connectivity, JobQueue, KeyValueStore, ListQueue, RedisBackend, StatusStore};
use pvgen_render::{check_renderer, ExecutionDriver};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::lifecycle::JobEngine;
use crate::metrics;
use crate::retry::{retry_async, Backoff, FailureTracker};

/// Result of a single loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing arrived within the poll interval.
    Idle,
    /// A job ran to a terminal status.
    Processed { job_id: JobId, status: JobStatus },
    /// The entry carried no job id and was dropped.
    Skipped,
}

/// Sequential consumer of the render queue.
pub struct QueueConsumer {
    queue: JobQueue,
    engine: Arc<JobEngine>,
    backoff: Duration,
    failure_log_limit: u32,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl QueueConsumer {
    pub fn new(queue: JobQueue, engine: Arc<JobEngine>) -> Self {
        let defaults = WorkerConfig::default();
        let (shutdown, _) = watch::channel(false);

        Self {
            queue,
            engine,
            backoff: defaults.backoff,
            failure_log_limit: defaults.failure_log_limit,
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_failure_log_limit(mut self, limit: u32) -> Self {
        self.failure_log_limit = limit;
        self
    }

    /// Build a Redis-backed consumer, validating the environment first.
    ///
    /// Fails when the output directories cannot be created or the store does
    /// not answer a ping after a few attempts.
    pub async fn connect(config: &WorkerConfig) -> WorkerResult<Self> {
        for dir in [&config.render.videos_dir, &config.render.scratch_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                WorkerError::config_error(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }

        if let Err(e) = check_renderer(&config.render.renderer_bin) {
            warn!("Renderer not available, every job will fail until it is installed: {}", e);
        }

        let backend = Arc::new(RedisBackend::new(&config.queue.redis_url)?);
        let store: &dyn KeyValueStore = backend.as_ref();
        let backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(2));
        retry_async("redis_ping", 4, backoff, || check_connectivity(store))
            .await
            .map_err(|(e, attempts)| {
                error!("Store unreachable after {} attempts", attempts);
                WorkerError::from(e)
            })?;
        info!("Connected to store at {}", config.queue.redis_url);

        let lists: Arc<dyn ListQueue> = backend.clone();
        let values: Arc<dyn KeyValueStore> = backend;
        let engine = JobEngine::new(
            StatusStore::new(values, config.queue.status_ttl),
            ExecutionDriver::new(config.render.clone()),
            config.videos_url_prefix.clone(),
        );

        Ok(Self::new(JobQueue::new(lists, &config.queue), Arc::new(engine))
            .with_backoff(config.backoff)
            .with_failure_log_limit(config.failure_log_limit))
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    ///
    /// Shutdown is only observed between jobs, so an in-flight render always
    /// finishes (or times out) first.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting queue consumer '{}' on '{}'",
            self.consumer_name,
            self.queue.key()
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(self.failure_log_limit);

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping consumer");
                break;
            }

            match self.poll_once().await {
                Ok(outcome) => {
                    failures.record_success();
                    if let PollOutcome::Processed { job_id, status } = outcome {
                        info!(job_id = %job_id, status = %status, "Job finished");
                    }
                }
                Err(e) => {
                    metrics::record_loop_error(e.kind());
                    if !e.is_connectivity() {
                        error!("Error consuming queue: {}", e);
                    } else if failures.record_failure() {
                        error!("Store unreachable: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }

        info!("Queue consumer '{}' stopped", self.consumer_name);
        Ok(())
    }

    /// One iteration: wait for an entry and process it.
    pub async fn poll_once(&self) -> WorkerResult<PollOutcome> {
        match self.queue.pop().await? {
            Some(raw) => self.handle_entry(&raw).await,
            None => Ok(PollOutcome::Idle),
        }
    }

    /// Process a raw entry as popped from the queue.
    pub async fn handle_entry(&self, raw: &str) -> WorkerResult<PollOutcome> {
        let entry = QueueEntry::from_json(raw).map_err(|e| WorkerError::malformed_entry(e.to_string()))?;

        let Some(job_id) = entry.job_id().cloned() else {
            warn!("Queue entry has no job id, discarding");
            metrics::record_entry_discarded();
            return Ok(PollOutcome::Skipped);
        };
        debug!(job_id = %job_id, "Dispatching job");

        let engine = Arc::clone(&self.engine);
        let task_id = job_id.clone();
        let task = tokio::spawn(async move { engine.process(task_id, entry.data).await });

        match task.await {
            Ok(status) => Ok(PollOutcome::Processed { job_id, status }),
            Err(e) => {
                let reason = if e.is_panic() { "job task panicked" } else { "job task cancelled" };
                self.engine.record_crash(&job_id, reason).await;
                Err(WorkerError::JobPanicked(format!("{} for job {}", reason, job_id)))
            }
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        // Stored even when no run loop is subscribed yet
        self.shutdown.send_replace(true);
    }
}
