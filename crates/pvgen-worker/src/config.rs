//! Worker configuration.

use std::time::Duration;

use pvgen_queue::QueueConfig;
use pvgen_render::RenderConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue and status store settings
    pub queue: QueueConfig,
    /// Renderer and filesystem settings
    pub render: RenderConfig,
    /// Public prefix under which published videos are served
    pub videos_url_prefix: String,
    /// Pause after an infrastructure error before polling again
    pub backoff: Duration,
    /// Prometheus exporter port; exporter disabled when unset
    pub metrics_port: Option<u16>,
    /// Consecutive loop failures logged before suppression kicks in
    pub failure_log_limit: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            render: RenderConfig::default(),
            videos_url_prefix: "/videos".to_string(),
            backoff: Duration::from_secs(5),
            metrics_port: None,
            failure_log_limit: 5,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            queue: QueueConfig::from_env(),
            render: RenderConfig::from_env(),
            videos_url_prefix: std::env::var("VIDEOS_URL_PREFIX")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "/videos".to_string()),
            backoff: Duration::from_secs(
                std::env::var("WORKER_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            failure_log_limit: 5,
        }
    }
}
