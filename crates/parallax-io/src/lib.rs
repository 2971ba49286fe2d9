#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// io error types.
pub mod error;

/// Wavefront OBJ export.
pub mod obj;

/// PNG image export.
pub mod png;

/// PLY point cloud export.
pub mod ply;

/// packaged textured-asset container.
pub mod asset;

pub use crate::error::IoError;
