#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// point cloud representation.
pub mod pointcloud;

/// linear algebra helpers for rigid transforms.
pub mod linalg;

/// structure from motion: two-view pose, triangulation and bundle adjustment.
pub mod sfm;

/// dense stereo block matching and depth maps.
pub mod stereo;

/// point cloud construction, outlier filtering and normal estimation.
pub mod cloud;

pub use crate::pointcloud::PointCloud;
