//! Job status records in the shared store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use pvgen_models::{JobId, JobRecord, StatusUpdate};
use serde_json::Value;

use crate::backend::KeyValueStore;
use crate::error::QueueResult;

/// Retention of a job status record, refreshed on every update.
pub const JOB_STATUS_TTL_SECS: u64 = 3600;

/// Typed client for `job:<id>` records.
///
/// Updates are independent read-merge-write cycles with no atomicity: two
/// concurrent updates to the same job race and the last writer wins. Each job
/// is normally driven by a single worker, so this is accepted.
#[derive(Clone)]
pub struct StatusStore {
    backend: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl StatusStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// Merge an update into the job's record.
    ///
    /// Status reporting is best-effort: failures are logged and swallowed.
    /// Returns whether the record was written.
    pub async fn update(&self, job_id: &JobId, update: StatusUpdate) -> bool {
        match self.try_update(job_id, &update).await {
            Ok(written) => written,
            Err(e) => {
                warn!(job_id = %job_id, status = %update.status, "Error updating job status: {}", e);
                false
            }
        }
    }

    async fn try_update(&self, job_id: &JobId, update: &StatusUpdate) -> QueueResult<bool> {
        let key = job_id.status_key();
        let mut record = match self.backend.get(&key).await? {
            Some(json) => decode(&json).unwrap_or_else(|e| {
                warn!(job_id = %job_id, "Discarding unreadable status record: {}", e);
                JobRecord::new(job_id.as_str())
            }),
            None => JobRecord::new(job_id.as_str()),
        };
        if record.id.is_empty() {
            record.id = job_id.to_string();
        }

        if let Err(conflict) = record.apply(update, Utc::now()) {
            warn!(job_id = %job_id, "Status update rejected: {}", conflict);
            return Ok(false);
        }

        let json = serde_json::to_string(&record)?;
        self.backend.set_ex(&key, &json, self.ttl).await?;

        debug!(
            job_id = %job_id,
            status = %record.status,
            progress = record.progress,
            "Updated job status"
        );
        Ok(true)
    }

    /// Read the current record, if any.
    pub async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        match self.backend.get(&job_id.status_key()).await? {
            Some(json) => Ok(Some(decode(&json)?)),
            None => Ok(None),
        }
    }
}

/// Any JSON object is a record; other JSON is unreadable.
fn decode(json: &str) -> serde_json::Result<JobRecord> {
    match serde_json::from_str(json)? {
        Value::Object(map) => Ok(JobRecord::from_object(map)),
        other => serde_json::from_value(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use pvgen_models::JobStatus;
    use tokio_test::{assert_err, assert_ok};

    fn store() -> (MemoryBackend, StatusStore) {
        let backend = MemoryBackend::new();
        let store = StatusStore::new(
            Arc::new(backend.clone()),
            Duration::from_secs(JOB_STATUS_TTL_SECS),
        );
        (backend, store)
    }

    #[tokio::test]
    async fn test_update_creates_record() {
        let (backend, store) = store();
        let id = JobId::from("job-1");

        assert!(store.update(&id, StatusUpdate::processing(10)).await);

        let record = assert_ok!(store.get(&id).await).expect("record");
        assert_eq!(record.id, "job-1");
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, 10);
        assert!(record.created_at.is_some());
        assert!(backend.ttl("job:job-1").await.unwrap() > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn test_update_preserves_foreign_fields() {
        let (backend, store) = store();
        backend
            .set_ex("job:job-2", r#"{"status":"queued","prompt":"draw a circle"}"#, Duration::from_secs(60))
            .await
            .unwrap();

        let id = JobId::from("job-2");
        store.update(&id, StatusUpdate::processing(25)).await;

        let raw = backend.get("job:job-2").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["prompt"], "draw a circle");
        assert_eq!(value["progress"], 25);
        // Expiry refreshed to the full window
        assert!(backend.ttl("job:job-2").await.unwrap() > Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_update_keeps_fields_beside_epoch_timestamps() {
        let (backend, store) = store();
        backend
            .set_ex(
                "job:job-6",
                r#"{"status":"queued","prompt":"draw a circle","createdAt":1700000000000,"updatedAt":1700000000.5}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let id = JobId::from("job-6");
        assert!(store.update(&id, StatusUpdate::processing(10)).await);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.id, "job-6");
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, 10);
        assert_eq!(record.extra["prompt"], "draw a circle");
        assert_eq!(
            record.created_at,
            chrono::DateTime::from_timestamp_millis(1_700_000_000_000)
        );
    }

    #[tokio::test]
    async fn test_unreadable_record_is_replaced() {
        let (backend, store) = store();
        backend
            .set_ex("job:job-3", "not json", Duration::from_secs(60))
            .await
            .unwrap();

        let id = JobId::from("job-3");
        assert!(store.update(&id, StatusUpdate::failed("boom")).await);
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_terminal_record_not_overwritten() {
        let (_backend, store) = store();
        let id = JobId::from("job-4");

        assert!(store.update(&id, StatusUpdate::completed("/videos/job-4.mp4")).await);
        assert!(!store.update(&id, StatusUpdate::failed("late failure")).await);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let (backend, store) = store();
        backend.set_unavailable(true);

        let id = JobId::from("job-5");
        assert!(!store.update(&id, StatusUpdate::processing(10)).await);
        assert_err!(store.get(&id).await);

        backend.set_unavailable(false);
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
