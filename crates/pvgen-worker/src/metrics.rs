//! Prometheus metrics for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus exporter, serving `/metrics` on `port`.
///
/// Must be called from within the tokio runtime.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_RECEIVED_TOTAL: &str = "pvgen_jobs_received_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "pvgen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "pvgen_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "pvgen_job_duration_seconds";
    pub const RENDER_DURATION_SECONDS: &str = "pvgen_render_duration_seconds";
    pub const SCRIPT_FIXES_TOTAL: &str = "pvgen_script_fixes_total";
    pub const ENTRIES_DISCARDED_TOTAL: &str = "pvgen_queue_entries_discarded_total";
    pub const LOOP_ERRORS_TOTAL: &str = "pvgen_loop_errors_total";
}

pub fn record_job_received() {
    counter!(names::JOBS_RECEIVED_TOTAL).increment(1);
}

pub fn record_job_completed(duration: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_job_failed(kind: &'static str, duration: Duration) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Time the renderer process ran, whatever its outcome.
pub fn record_render_duration(duration: Duration) {
    histogram!(names::RENDER_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_script_fix(fix: &'static str) {
    counter!(names::SCRIPT_FIXES_TOTAL, "fix" => fix).increment(1);
}

pub fn record_entry_discarded() {
    counter!(names::ENTRIES_DISCARDED_TOTAL).increment(1);
}

pub fn record_loop_error(kind: &'static str) {
    counter!(names::LOOP_ERRORS_TOTAL, "kind" => kind).increment(1);
}
