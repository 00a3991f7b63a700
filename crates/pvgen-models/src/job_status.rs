//! Job status record for progress tracking and polling.
//!
//! The record is stored as JSON under `job:<id>` and polled by services
//! outside the worker. It has a bounded lifetime and is not an archival log.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is queued waiting for a worker
    #[default]
    Queued,
    /// Job is actively being processed
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed with an error
    Failed,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields to merge into a job record. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub video_path: Option<String>,
}

impl StatusUpdate {
    /// A bare status change.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            error: None,
            video_path: None,
        }
    }

    /// Processing milestone.
    pub fn processing(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::status(JobStatus::Processing)
        }
    }

    /// Terminal success with the externally servable artifact path.
    pub fn completed(video_path: impl Into<String>) -> Self {
        Self {
            progress: Some(100),
            video_path: Some(video_path.into()),
            ..Self::status(JobStatus::Completed)
        }
    }

    /// Terminal failure with a human-readable message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::status(JobStatus::Failed)
        }
    }
}

/// Rejected attempt to move a record out of its terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job already {current}, refusing transition to {attempted}")]
pub struct TerminalConflict {
    pub current: JobStatus,
    pub attempted: JobStatus,
}

/// Job record as stored in the status store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: JobStatus,
    /// Progress percentage (0-100)
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Keys written by other services, preserved across updates.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobRecord {
    /// Create an empty record for a job.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Build a record from a stored JSON object written by any service.
    ///
    /// The worker's own keys are read leniently: timestamps may be RFC 3339
    /// strings or epoch numbers, and a key that still cannot be read falls
    /// back to its default. Every other key is kept verbatim.
    pub fn from_object(mut map: Map<String, Value>) -> Self {
        fn take<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
            map.remove(key).and_then(|v| serde_json::from_value(v).ok())
        }

        Self {
            id: take(&mut map, "id").unwrap_or_default(),
            status: take(&mut map, "status").unwrap_or_default(),
            progress: map
                .remove("progress")
                .and_then(|v| v.as_f64())
                .map(|p| p.clamp(0.0, 100.0) as u8)
                .unwrap_or_default(),
            error: take(&mut map, "error"),
            video_path: take(&mut map, "videoPath"),
            created_at: map.remove("createdAt").and_then(parse_timestamp),
            updated_at: map.remove("updatedAt").and_then(parse_timestamp),
            extra: map,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge an update into the record, stamping timestamps with `now`.
    ///
    /// A terminal record only accepts the same terminal status again.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) -> Result<(), TerminalConflict> {
        if self.is_terminal() && update.status != self.status {
            return Err(TerminalConflict {
                current: self.status,
                attempted: update.status,
            });
        }

        self.status = update.status;
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(video_path) = &update.video_path {
            self.video_path = Some(video_path.clone());
        }
        self.updated_at = Some(now);
        self.created_at.get_or_insert(now);
        Ok(())
    }
}

/// RFC 3339 string, or epoch milliseconds or seconds.
fn parse_timestamp(value: Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let n = n.as_f64()?;
            // Anything this large is milliseconds
            let millis = if n.abs() >= 1e11 { n } else { n * 1000.0 };
            DateTime::from_timestamp_millis(millis as i64)
        }
        _ => None,
    }
}
