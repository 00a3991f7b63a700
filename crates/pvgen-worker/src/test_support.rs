//! Shared fixtures: an in-memory store plus a shell stub standing in for the
//! renderer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use pvgen_queue::{MemoryBackend, QueueConfig, StatusStore};
use pvgen_render::{ExecutionDriver, RenderConfig};

use crate::lifecycle::JobEngine;

/// Stub body that writes a non-empty movie where the renderer would.
pub const WRITES_MOVIE: &str = "mkdir -p \"$media/videos/scene/480p30\" && printf 'frames' > \"$media/videos/scene/480p30/GeneratedScene.mp4\"";

pub struct Fixture {
    _root: TempDir,
    pub backend: MemoryBackend,
    pub scratch: PathBuf,
    pub videos: PathBuf,
    stub: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        Self {
            backend: MemoryBackend::new(),
            scratch: root.path().join("scratch"),
            videos: root.path().join("videos"),
            stub: root.path().join("fake-manim.sh"),
            _root: root,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    pub fn store(&self) -> StatusStore {
        StatusStore::new(Arc::new(self.backend.clone()), Duration::from_secs(3600))
    }

    /// Renderer config running `sh <stub>`; inside the stub `$media` is the
    /// output directory.
    pub fn render_config(&self, body: &str, timeout: Duration) -> RenderConfig {
        let script = format!("media=\"${{4#--media_dir=}}\"\n{}\n", body);
        std::fs::write(&self.stub, script).unwrap();

        RenderConfig {
            renderer_bin: "sh".to_string(),
            renderer_args: vec![self.stub.to_string_lossy().to_string()],
            timeout,
            scratch_dir: self.scratch.clone(),
            videos_dir: self.videos.clone(),
            ..Default::default()
        }
    }

    pub fn engine(&self, body: &str, timeout: Duration) -> JobEngine {
        self.engine_with_store(self.store(), body, timeout)
    }

    pub fn engine_with_store(&self, store: StatusStore, body: &str, timeout: Duration) -> JobEngine {
        let driver = ExecutionDriver::new(self.render_config(body, timeout));
        JobEngine::new(store, driver, "/videos")
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(&self.scratch)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }
}
