//! Queue entry definitions.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest job id accepted for rendering.
const MAX_JOB_ID_LEN: usize = 128;

/// Unique identifier for a job, assigned by the producer.
///
/// Producers may send ids as JSON strings or numbers; both deserialize into
/// the same string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the status record for this job.
    pub fn status_key(&self) -> String {
        format!("job:{}", self.0)
    }

    /// Check that the id can be embedded in scratch and output file names.
    pub fn validate_path_safe(&self) -> Result<(), InvalidJobId> {
        let id = self.as_str();
        if id.is_empty() {
            return Err(InvalidJobId::Empty);
        }
        if id.len() > MAX_JOB_ID_LEN {
            return Err(InvalidJobId::TooLong(id.len()));
        }
        if id.starts_with('.') {
            return Err(InvalidJobId::Unsafe(id.to_string()));
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':');
        if !id.chars().all(allowed) {
            return Err(InvalidJobId::Unsafe(id.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawJobId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawJobId::deserialize(deserializer)? {
            RawJobId::Text(s) => JobId(s),
            RawJobId::Number(n) => JobId(n.to_string()),
        })
    }
}

/// Reasons a job id cannot be used for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidJobId {
    #[error("job id is empty")]
    Empty,

    #[error("job id is too long ({0} bytes)")]
    TooLong(usize),

    #[error("job id contains characters that are not allowed in file names: {0:?}")]
    Unsafe(String),
}

/// Job payload carried under `data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Raw renderer script as produced upstream.
    #[serde(default, alias = "manimCode", skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl JobPayload {
    /// Create a payload holding a script.
    pub fn with_script(script: impl Into<String>) -> Self {
        Self {
            script: Some(script.into()),
        }
    }

    /// The script, if present and not blank.
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// A raw entry popped from the work queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Producer-assigned job id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,

    /// Job payload
    #[serde(default)]
    pub data: JobPayload,
}

impl QueueEntry {
    /// Create an entry for a job.
    pub fn new(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            id: Some(JobId::from_string(id)),
            data: JobPayload::with_script(script),
        }
    }

    /// Parse an entry from its JSON wire form.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// The job id, treating an empty string as missing.
    pub fn job_id(&self) -> Option<&JobId> {
        self.id.as_ref().filter(|id| !id.as_str().is_empty())
    }
}
