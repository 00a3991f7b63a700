//! Structured job logging.
//!
//! Every line carries `job_id` and `operation`, plus the time since the job
//! was picked up, so one render can be followed through a shared log stream.

use std::time::Instant;

use tracing::{error, info, warn, Span};

use pvgen_models::JobId;

use crate::lifecycle::JobStage;

/// Logger bound to one job and one operation.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
    started: Instant,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation,
            started: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Lifecycle transition together with the reported progress.
    pub fn stage(&self, stage: JobStage, progress: u8) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            stage = stage.as_str(),
            progress,
            elapsed_ms = self.elapsed_ms(),
            "Job {}", stage
        );
    }

    pub fn note(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            elapsed_ms = self.elapsed_ms(),
            "{}", message
        );
    }

    pub fn warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            "{}", message
        );
    }

    pub fn failure(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            elapsed_ms = self.elapsed_ms(),
            "{}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Span covering all work done for this job, including renderer and
    /// status store calls made further down.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, operation = self.operation)
    }
}
