//! Script normalization and renderer CLI driver.
//!
//! This crate provides:
//! - Best-effort textual repair of generated scene scripts
//! - Type-safe renderer command building
//! - Subprocess execution with a hard wall-clock timeout
//! - Per-job scratch isolation, artifact discovery and publication

pub mod artifact;
pub mod command;
pub mod driver;
pub mod error;
pub mod normalize;

pub use command::{check_renderer, RenderCommand, RenderOutput, RenderRunner};
pub use driver::{ExecutionDriver, RenderConfig, ScratchSpace};
pub use error::{RenderError, RenderResult};
pub use normalize::{normalize, Fix, NormalizedScript, ENTRY_SCENE};
