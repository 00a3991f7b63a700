//! Queue-driven video render worker.
//!
//! This crate provides:
//! - The job lifecycle engine (normalize, render, publish, cleanup)
//! - The queue consumer loop with backoff and graceful shutdown
//! - Worker configuration, structured job logging and metrics

pub mod config;
pub mod consumer;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use config::WorkerConfig;
pub use consumer::{PollOutcome, QueueConsumer};
pub use error::{WorkerError, WorkerResult};
pub use lifecycle::{JobEngine, JobStage};
pub use logging::JobLogger;
