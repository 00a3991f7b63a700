//! Error types for render operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur while executing a render.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer not found: {0}")]
    RendererNotFound(String),

    #[error("renderer timed out after {0:?}")]
    Timeout(Duration),

    #[error("renderer exited with {}: {stderr}", exit_label(.exit_code))]
    NonZeroExit {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("no artifact found in {}", .0.display())]
    NoArtifactFound(PathBuf),

    #[error("rendered artifact is empty: {}", .0.display())]
    EmptyArtifact(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RenderError {
    /// Create a non-zero exit error.
    pub fn non_zero_exit(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::NonZeroExit {
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short stable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::RendererNotFound(_) => "renderer_not_found",
            RenderError::Timeout(_) => "timeout",
            RenderError::NonZeroExit { .. } => "non_zero_exit",
            RenderError::NoArtifactFound(_) => "no_artifact",
            RenderError::EmptyArtifact(_) => "empty_artifact",
            RenderError::Io(_) => "io",
            RenderError::Internal(_) => "internal",
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}
