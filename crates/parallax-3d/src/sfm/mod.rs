/// essential matrix estimation and decomposition.
pub mod essential;

/// DLT triangulation.
pub mod triangulate;

/// two-view relative pose estimation with RANSAC.
pub mod twoview;

/// bundle adjustment over poses and points.
pub mod bundle;

pub use bundle::{bundle_adjust, BundleAdjustParams, BundleAdjustSummary, Observation};
pub use essential::{decompose_essential, essential_8point, sampson_distance};
pub use triangulate::{triangulate_point_linear, triangulate_world};
pub use twoview::{estimate_two_view, RansacParams, RansacResult, TwoViewConfig, TwoViewResult};

/// Errors returned by the structure from motion utilities.
#[derive(thiserror::Error, Debug)]
pub enum SfmError {
    /// Input correspondences are invalid or insufficient.
    #[error("Need at least {required} correspondences, got {actual}")]
    InvalidInput {
        /// Minimum required correspondences for the chosen model.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },

    /// RANSAC failed to find a valid model.
    #[error("RANSAC failed to find a valid model ({inlier_count} inliers, {min_inliers} required)")]
    RansacFailure {
        /// Inliers of the best candidate model.
        inlier_count: usize,
        /// Inliers required for acceptance.
        min_inliers: usize,
    },

    /// No pose candidate places the triangulated points in front of both cameras.
    #[error("No pose candidate passed the cheirality test")]
    CheiralityFailure,

    /// An observation references a camera or point that does not exist.
    #[error("Observation {index} references camera {camera} or point {point} out of range")]
    InvalidObservation {
        /// Index of the offending observation.
        index: usize,
        /// Referenced camera index.
        camera: usize,
        /// Referenced point index.
        point: usize,
    },
}
