#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// image representation for photogrammetry purposes.
pub mod image;

/// color space conversions.
pub mod color;

/// pinhole camera model: intrinsics, extrinsics, projection.
pub mod camera;

/// Error types for the image module.
pub mod error;

pub use crate::camera::{CameraError, CameraExtrinsics, CameraIntrinsics, PinholeCamera};
pub use crate::error::ImageError;
pub use crate::image::{Image, ImageDtype, ImageSize};
