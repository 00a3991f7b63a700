//! Execution driver: scratch materialization, renderer invocation, artifact
//! publication and cleanup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use pvgen_models::JobId;

use crate::artifact::{find_artifact, publish_copy};
use crate::command::{RenderCommand, RenderOutput, RenderRunner};
use crate::error::{RenderError, RenderResult};
use crate::normalize::ENTRY_SCENE;

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Renderer executable
    pub renderer_bin: String,
    /// Leading arguments for the executable
    pub renderer_args: Vec<String>,
    /// Output container format (also the artifact extension)
    pub output_format: String,
    /// Resolution as `width,height`
    pub resolution: String,
    /// Frames per second
    pub frame_rate: u32,
    /// Renderer log verbosity
    pub verbosity: String,
    /// Hard wall-clock bound per render
    pub timeout: Duration,
    /// Root for per-job scratch files
    pub scratch_dir: PathBuf,
    /// Stable location for published artifacts
    pub videos_dir: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            renderer_bin: "manim".to_string(),
            renderer_args: Vec::new(),
            output_format: "mp4".to_string(),
            resolution: "720,480".to_string(),
            frame_rate: 30,
            verbosity: "WARNING".to_string(),
            timeout: Duration::from_secs(300), // 5 minutes
            scratch_dir: std::env::temp_dir(),
            videos_dir: PathBuf::from("/app/videos"),
        }
    }
}

impl RenderConfig {
    /// Create config from environment variables.
    ///
    /// `RENDERER_BIN` may carry leading arguments, e.g. `python3 -m manim`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut renderer = std::env::var("RENDERER_BIN")
            .ok()
            .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty())
            .unwrap_or_else(|| vec![defaults.renderer_bin.clone()]);
        let renderer_bin = renderer.remove(0);

        Self {
            renderer_bin,
            renderer_args: renderer,
            output_format: defaults.output_format,
            resolution: std::env::var("RENDER_RESOLUTION").unwrap_or(defaults.resolution),
            frame_rate: std::env::var("RENDER_FRAME_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.frame_rate),
            verbosity: defaults.verbosity,
            timeout: Duration::from_secs(
                std::env::var("RENDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            scratch_dir: std::env::var("WORKER_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            videos_dir: std::env::var("VIDEOS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.videos_dir),
        }
    }
}

/// Scratch resources owned by one execution attempt.
///
/// Both the script file and the output directory carry a random suffix, so
/// no two attempts share a path even for the same job id. [`cleanup`] removes
/// both and logs failures; dropping without calling it still removes them.
///
/// [`cleanup`]: ScratchSpace::cleanup
#[derive(Debug)]
pub struct ScratchSpace {
    script: Option<NamedTempFile>,
    output: Option<TempDir>,
    script_path: PathBuf,
    output_dir: PathBuf,
}

impl ScratchSpace {
    /// Path of the materialized script.
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Directory the renderer writes into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Delete the script file and the output directory tree.
    pub fn cleanup(mut self) {
        if let Some(script) = self.script.take() {
            if let Err(e) = script.close() {
                warn!("Failed to remove scratch script {}: {}", self.script_path.display(), e);
            }
        }
        if let Some(output) = self.output.take() {
            if let Err(e) = output.close() {
                warn!("Failed to remove scratch dir {}: {}", self.output_dir.display(), e);
            }
        }
        debug!("Cleaned up scratch space {}", self.output_dir.display());
    }
}

/// Drives the external renderer for one job at a time.
#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    config: RenderConfig,
}

impl ExecutionDriver {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Stable, job-keyed location of the published artifact.
    pub fn final_path(&self, job_id: &JobId) -> PathBuf {
        self.config
            .videos_dir
            .join(format!("{}.{}", job_id, self.config.output_format))
    }

    /// Write the script to a fresh file and create a fresh output directory.
    pub async fn prepare(&self, job_id: &JobId, script: &str) -> RenderResult<ScratchSpace> {
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;
        let prefix = format!("pvgen_{}_", job_id);

        let script_file = Builder::new()
            .prefix(&prefix)
            .suffix(".py")
            .tempfile_in(&self.config.scratch_dir)?;
        let script_path = script_file.path().to_path_buf();
        tokio::fs::write(&script_path, script).await?;

        // On error the script file is removed when `script_file` drops
        let output = Builder::new().prefix(&prefix).tempdir_in(&self.config.scratch_dir)?;
        let output_dir = output.path().to_path_buf();

        debug!(
            job_id = %job_id,
            "Materialized script {} with output dir {}",
            script_path.display(),
            output_dir.display()
        );

        Ok(ScratchSpace {
            script: Some(script_file),
            output: Some(output),
            script_path,
            output_dir,
        })
    }

    /// Command line for rendering a prepared scratch space.
    pub fn command(&self, scratch: &ScratchSpace) -> RenderCommand {
        let cmd = RenderCommand::new(scratch.script_path(), ENTRY_SCENE, scratch.output_dir())
            .program(self.config.renderer_bin.clone())
            .format(self.config.output_format.clone())
            .resolution(self.config.resolution.clone())
            .frame_rate(self.config.frame_rate)
            .disable_caching(true)
            .verbosity(self.config.verbosity.clone());

        self.config
            .renderer_args
            .iter()
            .fold(cmd, |cmd, arg| cmd.program_arg(arg.clone()))
    }

    /// Run the renderer against a prepared scratch space.
    pub async fn render(&self, scratch: &ScratchSpace) -> RenderResult<RenderOutput> {
        let runner = RenderRunner::new().with_timeout(self.config.timeout);
        let output = runner.run(&self.command(scratch)).await?;

        if !output.stdout.trim().is_empty() {
            debug!("Renderer stdout: {}", output.stdout.trim());
        }
        Ok(output)
    }

    /// Locate the rendered file and copy it to the job's final location.
    pub async fn publish(&self, scratch: &ScratchSpace, job_id: &JobId) -> RenderResult<PathBuf> {
        let search_dir = scratch.output_dir().to_path_buf();
        let extension = self.config.output_format.clone();
        let found = tokio::task::spawn_blocking(move || find_artifact(&search_dir, &extension))
            .await
            .map_err(|e| RenderError::internal(format!("artifact search task failed: {}", e)))??;

        let Some(artifact) = found else {
            return Err(RenderError::NoArtifactFound(scratch.output_dir().to_path_buf()));
        };

        let final_path = self.final_path(job_id);
        let size = publish_copy(&artifact, &final_path).await?;
        info!(
            job_id = %job_id,
            "Published {} ({} bytes) to {}",
            artifact.display(),
            size,
            final_path.display()
        );
        Ok(final_path)
    }

    /// Full contract: prepare, render, publish, with unconditional cleanup.
    pub async fn execute(&self, job_id: &JobId, script: &str) -> RenderResult<PathBuf> {
        let scratch = self.prepare(job_id, script).await?;

        let result = match self.render(&scratch).await {
            Ok(_) => self.publish(&scratch, job_id).await,
            Err(e) => Err(e),
        };

        scratch.cleanup();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        scratch: PathBuf,
        videos: PathBuf,
        stub: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let scratch = root.path().join("scratch");
            let videos = root.path().join("videos");
            let stub = root.path().join("fake-manim.sh");
            Self {
                scratch,
                videos,
                stub,
                _root: root,
            }
        }

        /// Driver whose renderer is `sh <stub>`; `$1` is the script,
        /// `$4` is `--media_dir=<dir>`.
        fn driver(&self, body: &str, timeout: Duration) -> ExecutionDriver {
            let script = format!("media=\"${{4#--media_dir=}}\"\n{}\n", body);
            std::fs::write(&self.stub, script).unwrap();

            ExecutionDriver::new(RenderConfig {
                renderer_bin: "sh".to_string(),
                renderer_args: vec![self.stub.to_string_lossy().to_string()],
                timeout,
                scratch_dir: self.scratch.clone(),
                videos_dir: self.videos.clone(),
                ..Default::default()
            })
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(&self.scratch)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(true)
        }
    }

    const WRITES_MOVIE: &str = "mkdir -p \"$media/videos/s/480p30\" && printf 'frames' > \"$media/videos/s/480p30/GeneratedScene.mp4\"";

    #[test]
    fn test_final_path() {
        let driver = ExecutionDriver::new(RenderConfig {
            videos_dir: PathBuf::from("/srv/videos"),
            ..Default::default()
        });
        assert_eq!(
            driver.final_path(&JobId::from("job-1")),
            PathBuf::from("/srv/videos/job-1.mp4")
        );
    }

    #[test]
    fn test_command_uses_entry_scene() {
        let fx = Fixture::new();
        let driver = fx.driver("true", Duration::from_secs(5));
        let scratch = ScratchSpace {
            script: None,
            output: None,
            script_path: PathBuf::from("/s/x.py"),
            output_dir: PathBuf::from("/s/out"),
        };
        let args = driver.command(&scratch).build_args();
        assert_eq!(args[1], "/s/x.py");
        assert_eq!(args[2], "GeneratedScene");
        assert_eq!(args[4], "--media_dir=/s/out");
    }

    #[tokio::test]
    async fn test_prepare_isolates_jobs() {
        let fx = Fixture::new();
        let driver = fx.driver("true", Duration::from_secs(5));

        let a = driver.prepare(&JobId::from("a"), "print('a')").await.unwrap();
        let b = driver.prepare(&JobId::from("b"), "print('b')").await.unwrap();
        let a2 = driver.prepare(&JobId::from("a"), "print('a')").await.unwrap();

        assert_ne!(a.output_dir(), b.output_dir());
        assert_ne!(a.output_dir(), a2.output_dir());
        assert_ne!(a.script_path(), a2.script_path());
        assert!(!a.output_dir().starts_with(b.output_dir()));
        assert!(!b.output_dir().starts_with(a.output_dir()));
        assert_eq!(std::fs::read_to_string(a.script_path()).unwrap(), "print('a')");

        let paths = [a.script_path().to_path_buf(), a.output_dir().to_path_buf()];
        a.cleanup();
        b.cleanup();
        drop(a2);
        assert!(paths.iter().all(|p| !p.exists()));
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_execute_success() {
        let fx = Fixture::new();
        let driver = fx.driver(WRITES_MOVIE, Duration::from_secs(10));

        let path = driver.execute(&JobId::from("job-ok"), "print('x')").await.unwrap();
        assert_eq!(path, fx.videos.join("job-ok.mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), b"frames");
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_execute_no_artifact() {
        let fx = Fixture::new();
        let driver = fx.driver("echo rendered nothing", Duration::from_secs(10));

        let err = driver.execute(&JobId::from("job-none"), "x").await.unwrap_err();
        assert!(matches!(err, RenderError::NoArtifactFound(_)));
        assert!(err.to_string().contains("no artifact found"));
        assert!(fx.scratch_is_empty());
        assert!(!fx.videos.join("job-none.mp4").exists());
    }

    #[tokio::test]
    async fn test_execute_empty_artifact() {
        let fx = Fixture::new();
        let driver = fx.driver(": > \"$media/GeneratedScene.mp4\"", Duration::from_secs(10));

        let err = driver.execute(&JobId::from("job-empty"), "x").await.unwrap_err();
        assert!(matches!(err, RenderError::EmptyArtifact(_)));
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_execute_non_zero_exit() {
        let fx = Fixture::new();
        let driver = fx.driver("echo 'SyntaxError: bad' >&2; exit 1", Duration::from_secs(10));

        let err = driver.execute(&JobId::from("job-bad"), "x").await.unwrap_err();
        assert!(err.to_string().contains("SyntaxError"));
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let fx = Fixture::new();
        let driver = fx.driver("exec sleep 30", Duration::from_millis(300));

        let err = driver.execute(&JobId::from("job-slow"), "x").await.unwrap_err();
        assert!(matches!(err, RenderError::Timeout(_)));
        assert!(fx.scratch_is_empty());
    }
}
