//! Worker error types.

use thiserror::Error;

use pvgen_models::InvalidJobId;
use pvgen_queue::QueueError;
use pvgen_render::RenderError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The job itself is unusable; recorded on the job, never retried.
    #[error("{0}")]
    InvalidInput(String),

    #[error("Malformed queue entry: {0}")]
    MalformedEntry(String),

    #[error("Job task failed: {0}")]
    JobPanicked(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<InvalidJobId> for WorkerError {
    fn from(e: InvalidJobId) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

impl WorkerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn malformed_entry(msg: impl Into<String>) -> Self {
        Self::MalformedEntry(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::InvalidInput(_) => "invalid_input",
            WorkerError::MalformedEntry(_) => "malformed_entry",
            WorkerError::JobPanicked(_) => "panicked",
            WorkerError::ConfigError(_) => "config",
            WorkerError::Render(e) => e.kind(),
            WorkerError::Queue(_) => "queue",
        }
    }

    /// The store could not be reached. Repeats of these are log-suppressed.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_connectivity())
    }
}
