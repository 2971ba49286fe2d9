#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// corner detection with subpixel refinement.
pub mod detector;

/// binary patch descriptors.
pub mod descriptor;

/// brute-force descriptor matching with ratio test.
pub mod matcher;

/// Error types for the features module.
pub mod error;

pub use crate::descriptor::{compute_descriptors, DESCRIPTOR_BYTES};
pub use crate::detector::{detect_corners, DetectorConfig, KeyPoint};
pub use crate::error::FeatureError;
pub use crate::matcher::{match_descriptors, FeatureMatch, MatcherConfig};

use parallax_image::Image;

/// Keypoints and their descriptors extracted from a single image.
#[derive(Debug, Clone, Default)]
pub struct Features {
    /// The detected keypoints, strongest first.
    pub keypoints: Vec<KeyPoint>,
    /// One descriptor per keypoint.
    pub descriptors: Vec<[u8; DESCRIPTOR_BYTES]>,
}

impl Features {
    /// The number of keypoints.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Whether no keypoints were detected.
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detect corners and compute their descriptors in one pass.
///
/// Keypoints too close to the image border for the descriptor patch are
/// dropped so that `keypoints` and `descriptors` always align.
pub fn extract_features(
    gray: &Image<f32, 1>,
    config: &DetectorConfig,
) -> Result<Features, FeatureError> {
    let keypoints = detect_corners(gray, config)?;
    let (keypoints, descriptors) = compute_descriptors(gray, keypoints);
    log::debug!(
        "extracted {} keypoints ({}x{})",
        keypoints.len(),
        gray.width(),
        gray.height()
    );
    Ok(Features {
        keypoints,
        descriptors,
    })
}
