//! Shared data models for the pvgen render worker.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers and queue entries
//! - Job status and the polled job record

pub mod job;
pub mod job_status;

// Re-export common types
pub use job::{InvalidJobId, JobId, JobPayload, QueueEntry};
pub use job_status::{JobRecord, JobStatus, StatusUpdate, TerminalConflict};
