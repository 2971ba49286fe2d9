#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// pipeline stages and the error taxonomy.
pub mod error;

/// top-level pipeline configuration.
pub mod config;

/// progress reporting and cancellation hooks.
pub mod hooks;

/// the staged reconstruction pipeline.
pub mod pipeline;

pub use crate::config::ReconstructionConfig;
pub use crate::error::{ReconError, Stage};
pub use crate::hooks::{CancelToken, Hooks};
pub use crate::pipeline::{reconstruct, Reconstruction, ReconstructionResult};
