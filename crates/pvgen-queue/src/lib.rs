//! Redis work queue and job status store.
//!
//! This crate provides:
//! - Blocking pop of raw entries from a Redis list
//! - Best-effort merge-writes of job status records with expiry
//! - An in-memory backend with the same semantics for tests and local runs

pub mod backend;
pub mod error;
pub mod memory;
pub mod queue;
pub mod status;

pub use backend::{KeyValueStore, ListQueue, RedisBackend};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryBackend;
pub use queue::{check_connectivity, JobQueue, QueueConfig, DEFAULT_QUEUE_KEY};
pub use status::{StatusStore, JOB_STATUS_TTL_SECS};
