#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// texture and parameterization errors.
pub mod error;

/// conformal UV unwrapping.
pub mod lscm;

/// texture atlas baking from posed views.
pub mod bake;

pub use crate::error::TextureError;
