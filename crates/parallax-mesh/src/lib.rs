#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// triangle mesh representation.
pub mod mesh;

/// error types for mesh operations.
pub mod error;

/// adaptive octree over a point cloud.
pub mod octree;

/// poisson-style implicit surface from an oriented point cloud.
pub mod poisson;

/// marching cubes iso-surface extraction.
pub mod marching;

/// laplacian mesh smoothing.
pub mod smooth;

/// quadric error metric decimation.
pub mod decimate;

pub use crate::error::MeshError;
pub use crate::mesh::TriangleMesh;
