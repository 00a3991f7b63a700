//! Job lifecycle engine.
//!
//! Drives one job from receipt to a terminal status:
//!
//! ```text
//! received -> normalizing -> executing -> completed
//!        \          \             \----> failed
//!         \----------\------------------> failed
//! ```
//!
//! Progress is reported at fixed milestones: 10 on receipt, 25 after
//! normalization, 40 once the scratch files exist, 60 right before the
//! renderer starts, 80 once it exits (even unsuccessfully), and 100 with the completed status once
//! the artifact is published. Status writes are best-effort and never stop
//! the job.

use std::fmt;
use std::time::Instant;

use tracing::Instrument;

use pvgen_models::{JobId, JobPayload, JobStatus, StatusUpdate};
use pvgen_queue::StatusStore;
use pvgen_render::{normalize, ExecutionDriver, RenderError, ScratchSpace};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Operation name attached to every job log line.
const OPERATION: &str = "render_video";

/// Lifecycle stage of a job inside this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Normalizing,
    Executing,
    Completed,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Received => "received",
            JobStage::Normalizing => "normalizing",
            JobStage::Executing => "executing",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs jobs end to end and records their status.
pub struct JobEngine {
    store: StatusStore,
    driver: ExecutionDriver,
    videos_url_prefix: String,
}

impl JobEngine {
    pub fn new(store: StatusStore, driver: ExecutionDriver, videos_url_prefix: impl Into<String>) -> Self {
        Self {
            store,
            driver,
            videos_url_prefix: videos_url_prefix.into(),
        }
    }

    /// Public path under which a job's video is served.
    pub fn video_url(&self, job_id: &JobId) -> String {
        format!(
            "{}/{}.{}",
            self.videos_url_prefix.trim_end_matches('/'),
            job_id,
            self.driver.config().output_format
        )
    }

    /// Process one job to a terminal status.
    ///
    /// Never returns an error: every failure is recorded on the job's status
    /// record and reflected in the returned status.
    pub async fn process(&self, job_id: JobId, payload: JobPayload) -> JobStatus {
        let logger = JobLogger::new(&job_id, OPERATION);
        let span = logger.span();

        async {
            let started = Instant::now();
            metrics::record_job_received();
            self.report(&job_id, &logger, JobStage::Received, StatusUpdate::processing(10))
                .await;

            let mut scratch = None;
            let result = self.run_stages(&job_id, &payload, &logger, &mut scratch).await;

            if let Some(scratch) = scratch.take() {
                scratch.cleanup();
            }

            match result {
                Ok(video_url) => {
                    self.report(
                        &job_id,
                        &logger,
                        JobStage::Completed,
                        StatusUpdate::completed(video_url.clone()),
                    )
                    .await;
                    metrics::record_job_completed(started.elapsed());
                    logger.note(&format!("video available at {}", video_url));
                    JobStatus::Completed
                }
                Err(e) => {
                    let message = failure_message(&e);
                    logger.failure(&message);
                    self.report(&job_id, &logger, JobStage::Failed, StatusUpdate::failed(message))
                        .await;
                    metrics::record_job_failed(e.kind(), started.elapsed());
                    JobStatus::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Record a job as failed after its task died unexpectedly.
    pub async fn record_crash(&self, job_id: &JobId, reason: &str) {
        let logger = JobLogger::new(job_id, OPERATION);
        let message = format!("Video generation failed: internal error ({})", reason);
        logger.failure(&message);
        self.report(job_id, &logger, JobStage::Failed, StatusUpdate::failed(message))
            .await;
        metrics::record_job_failed("panicked", std::time::Duration::ZERO);
    }

    /// Stages after receipt. The scratch space is handed back through
    /// `scratch` so the caller cleans it up exactly once, whatever failed.
    async fn run_stages(
        &self,
        job_id: &JobId,
        payload: &JobPayload,
        logger: &JobLogger,
        scratch: &mut Option<ScratchSpace>,
    ) -> WorkerResult<String> {
        job_id.validate_path_safe()?;
        let raw = payload
            .script()
            .ok_or_else(|| WorkerError::invalid_input("no script provided"))?;

        // Normalizing
        let normalized = normalize(raw);
        for fix in &normalized.fixes {
            metrics::record_script_fix(fix.as_str());
        }
        if normalized.used_template() {
            logger.warning("script could not be repaired, rendering fallback template");
        } else if !normalized.fixes.is_empty() {
            let applied: Vec<_> = normalized.fixes.iter().map(|f| f.as_str()).collect();
            logger.note(&format!("script repaired: {}", applied.join(", ")));
        }
        self.report(job_id, logger, JobStage::Normalizing, StatusUpdate::processing(25))
            .await;

        // Executing
        let space: &ScratchSpace = scratch.insert(self.driver.prepare(job_id, &normalized.source).await?);
        self.report(job_id, logger, JobStage::Executing, StatusUpdate::processing(40))
            .await;

        self.report(job_id, logger, JobStage::Executing, StatusUpdate::processing(60))
            .await;
        let render_started = Instant::now();
        let rendered = self.driver.render(space).await;
        metrics::record_render_duration(render_started.elapsed());
        // The renderer ran to completion, whatever its exit status
        if matches!(rendered, Ok(_) | Err(RenderError::NonZeroExit { .. })) {
            self.report(job_id, logger, JobStage::Executing, StatusUpdate::processing(80))
                .await;
        }
        let output = rendered?;
        logger.note(&format!("renderer finished in {:?}", output.elapsed));

        let published = self.driver.publish(space, job_id).await?;
        logger.note(&format!("artifact published to {}", published.display()));

        Ok(self.video_url(job_id))
    }

    async fn report(&self, job_id: &JobId, logger: &JobLogger, stage: JobStage, update: StatusUpdate) {
        logger.stage(stage, update.progress.unwrap_or_default());
        self.store.update(job_id, update).await;
    }
}

/// Human-readable error recorded on a failed job.
pub fn failure_message(err: &WorkerError) -> String {
    match err {
        WorkerError::Render(RenderError::Timeout(limit)) => format!(
            "Video generation timed out: renderer exceeded the {:?} timeout",
            limit
        ),
        other => format!("Video generation failed: {}", other),
    }
}
