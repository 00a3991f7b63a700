//! Renderer command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};

/// Tail of stderr kept in a [`RenderError::NonZeroExit`].
const STDERR_TAIL_BYTES: usize = 4096;

/// How long to wait for output pipes to drain once the renderer exited.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for renderer commands.
#[derive(Debug, Clone)]
pub struct RenderCommand {
    /// Renderer executable
    program: String,
    /// Arguments placed before the script (e.g. `-m manim` for a python launcher)
    program_args: Vec<String>,
    /// Script to render
    script: PathBuf,
    /// Scene class to render
    scene: String,
    /// Directory the renderer writes into
    media_dir: PathBuf,
    /// Output container format
    format: String,
    /// Resolution as `width,height`
    resolution: String,
    /// Frames per second
    frame_rate: u32,
    /// Disable the renderer's partial-movie cache
    disable_caching: bool,
    /// Renderer log verbosity
    verbosity: String,
    /// Extra trailing arguments
    extra_args: Vec<String>,
}

impl RenderCommand {
    /// Create a new render command with default parameters.
    pub fn new(script: impl AsRef<Path>, scene: impl Into<String>, media_dir: impl AsRef<Path>) -> Self {
        Self {
            program: "manim".to_string(),
            program_args: Vec::new(),
            script: script.as_ref().to_path_buf(),
            scene: scene.into(),
            media_dir: media_dir.as_ref().to_path_buf(),
            format: "mp4".to_string(),
            resolution: "720,480".to_string(),
            frame_rate: 30,
            disable_caching: true,
            verbosity: "WARNING".to_string(),
            extra_args: Vec::new(),
        }
    }

    /// Set the renderer executable.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Add a leading argument for the renderer executable.
    pub fn program_arg(mut self, arg: impl Into<String>) -> Self {
        self.program_args.push(arg.into());
        self
    }

    /// Set output format.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Set resolution (`width,height`).
    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }

    /// Set frame rate.
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Enable or disable the renderer cache flag.
    pub fn disable_caching(mut self, disable: bool) -> Self {
        self.disable_caching = disable;
        self
    }

    /// Set log verbosity.
    pub fn verbosity(mut self, level: impl Into<String>) -> Self {
        self.verbosity = level.into();
        self
    }

    /// Add an extra argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Renderer executable.
    pub fn program_name(&self) -> &str {
        &self.program
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.program_args.clone();
        args.extend([
            self.script.to_string_lossy().to_string(),
            self.scene.clone(),
            format!("--format={}", self.format),
            format!("--media_dir={}", self.media_dir.to_string_lossy()),
            format!("--resolution={}", self.resolution),
            format!("--frame_rate={}", self.frame_rate),
        ]);

        if self.disable_caching {
            args.push("--disable_caching".to_string());
        }

        args.push(format!("--verbosity={}", self.verbosity));
        args.extend(self.extra_args.iter().cloned());

        args
    }
}

/// Captured result of a finished renderer process.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Runner for renderer commands with a hard wall-clock timeout.
#[derive(Debug, Clone, Default)]
pub struct RenderRunner {
    /// Timeout
    timeout: Option<Duration>,
}

impl RenderRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run a render command to completion, capturing stdout and stderr.
    ///
    /// Fails with [`RenderError::Timeout`] when the timeout elapses (the
    /// renderer and its children are killed) and with
    /// [`RenderError::NonZeroExit`] when the renderer reports failure.
    pub async fn run(&self, cmd: &RenderCommand) -> RenderResult<RenderOutput> {
        check_renderer(cmd.program_name())?;

        let args = cmd.build_args();
        debug!("Running renderer: {} {}", cmd.program_name(), args.join(" "));

        let mut std_command = std::process::Command::new(cmd.program_name());
        std_command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout can take down the renderer's children too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }

        let mut command = Command::from(std_command);
        command.kill_on_drop(true);

        let started = Instant::now();
        let mut child = command.spawn()?;

        let stdout_task = child.stdout.take().map(spawn_drain);
        let stderr_task = child.stderr.take().map(spawn_drain);

        let status = match self.wait_for_completion(&mut child).await {
            Ok(status) => status,
            Err(e) => {
                abort_drain(stdout_task);
                abort_drain(stderr_task);
                return Err(e);
            }
        };

        let output = RenderOutput {
            exit_code: status.code(),
            stdout: collect_drain(stdout_task).await,
            stderr: collect_drain(stderr_task).await,
            elapsed: started.elapsed(),
        };

        if status.success() {
            Ok(output)
        } else {
            Err(RenderError::non_zero_exit(
                output.exit_code,
                tail(&output.stderr, STDERR_TAIL_BYTES),
            ))
        }
    }

    /// Wait for the child process, killing it on timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> RenderResult<std::process::ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait().await?);
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!("Renderer timed out after {:?}, killing process", timeout);
                kill_process_group(child);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill renderer: {}", e);
                }
                Err(RenderError::Timeout(timeout))
            }
        }
    }
}

fn spawn_drain<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Renderer pipe closed with error: {}", e);
        }
        buf
    })
}

fn abort_drain(task: Option<JoinHandle<Vec<u8>>>) {
    if let Some(task) = task {
        task.abort();
    }
}

async fn collect_drain(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };

    // A grandchild can keep the pipe open after the renderer itself exited
    match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            debug!("Renderer pipe reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Keep the last `max` bytes of `text`, on a char boundary.
fn tail(text: &str, max: usize) -> String {
    let text = text.trim_end();
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

/// Check that a renderer executable is available.
pub fn check_renderer(program: &str) -> RenderResult<PathBuf> {
    which::which(program).map_err(|_| RenderError::RendererNotFound(program.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = RenderCommand::new("/tmp/scene.py", "GeneratedScene", "/tmp/media")
            .resolution("1280,720")
            .frame_rate(60);

        let args = cmd.build_args();
        assert_eq!(args[0], "/tmp/scene.py");
        assert_eq!(args[1], "GeneratedScene");
        assert!(args.contains(&"--format=mp4".to_string()));
        assert!(args.contains(&"--media_dir=/tmp/media".to_string()));
        assert!(args.contains(&"--resolution=1280,720".to_string()));
        assert!(args.contains(&"--frame_rate=60".to_string()));
        assert!(args.contains(&"--disable_caching".to_string()));
        assert!(args.contains(&"--verbosity=WARNING".to_string()));
    }

    #[test]
    fn test_caching_flag_optional() {
        let cmd = RenderCommand::new("s.py", "S", "m").disable_caching(false);
        assert!(!cmd.build_args().contains(&"--disable_caching".to_string()));
    }

    #[test]
    fn test_tail_truncation() {
        assert_eq!(tail("short\n", 10), "short");
        let long = "é".repeat(10);
        let cut = tail(&long, 5);
        assert!(cut.starts_with("..."));
        assert!(cut.len() <= 8);
    }

    #[test]
    fn test_missing_renderer() {
        let err = check_renderer("pvgen-no-such-renderer").unwrap_err();
        assert!(matches!(err, RenderError::RendererNotFound(_)));
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;

        // Run through `sh` so a freshly written file is never exec'd directly
        fn stub(dir: &Path, body: &str) -> String {
            let path = dir.join("fake-renderer.sh");
            std::fs::write(&path, format!("{}\n", body)).unwrap();
            path.to_string_lossy().to_string()
        }

        fn cmd(script: String) -> RenderCommand {
            RenderCommand::new("scene.py", "GeneratedScene", "media")
                .program("sh")
                .program_arg(script)
        }

        #[tokio::test]
        async fn test_captures_output() {
            let dir = tempfile::tempdir().unwrap();
            let program = stub(dir.path(), "echo \"args: $*\"; echo warn >&2");

            let output = RenderRunner::new()
                .with_timeout(Duration::from_secs(10))
                .run(&cmd(program))
                .await
                .unwrap();
            assert_eq!(output.exit_code, Some(0));
            assert!(output.stdout.contains("scene.py GeneratedScene --format=mp4"));
            assert_eq!(output.stderr.trim(), "warn");
        }

        #[tokio::test]
        async fn test_non_zero_exit_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let program = stub(dir.path(), "echo 'NameError: Circl' >&2; exit 3");

            let err = RenderRunner::new().run(&cmd(program)).await.unwrap_err();
            match err {
                RenderError::NonZeroExit { exit_code, stderr } => {
                    assert_eq!(exit_code, Some(3));
                    assert!(stderr.contains("NameError"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_timeout_kills_renderer() {
            let dir = tempfile::tempdir().unwrap();
            let program = stub(dir.path(), "sleep 30");

            let started = Instant::now();
            let err = RenderRunner::new()
                .with_timeout(Duration::from_millis(300))
                .run(&cmd(program))
                .await
                .unwrap_err();
            assert!(matches!(err, RenderError::Timeout(t) if t == Duration::from_millis(300)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }
}
