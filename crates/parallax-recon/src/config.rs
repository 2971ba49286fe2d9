use serde::{Deserialize, Serialize};

use parallax_mesh::octree::MAX_OCTREE_DEPTH;

use crate::error::{ReconError, Stage};

/// Top-level configuration of the reconstruction pipeline.
///
/// The per-stage option structs of the member crates are filled from these
/// fields; everything not exposed here keeps its documented default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Octree subdivision depth driving the implicit-solve grid.
    pub octree_depth: usize,
    /// Marching-cubes grid resolution.
    pub grid_resolution: usize,
    /// Fraction of the extracted triangles kept by decimation.
    pub decimation_ratio: f64,
    /// Side length of the square texture atlas in pixels.
    pub atlas_size: usize,
    /// Largest stereo disparity searched, inclusive.
    pub max_disparity: usize,
    /// Half size of the stereo matching block, the window is `2r + 1` squared.
    pub block_radius: usize,
    /// Neighborhood size for outlier filtering and normal estimation.
    pub neighborhood_size: usize,
    /// Outlier rejection threshold in standard deviations.
    pub outlier_std_mult: f64,
    /// Lowe ratio threshold of the descriptor matcher.
    pub match_ratio: f32,
    /// Bundle adjustment iteration cap.
    pub bundle_iterations: usize,
    /// Laplacian smoothing iterations over the extracted surface.
    pub smooth_iterations: usize,
    /// Laplacian smoothing step size.
    pub smooth_lambda: f64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            octree_depth: 6,
            grid_resolution: 32,
            decimation_ratio: 0.5,
            atlas_size: 4096,
            max_disparity: 64,
            block_radius: 3,
            neighborhood_size: 20,
            outlier_std_mult: 2.0,
            match_ratio: 0.75,
            bundle_iterations: 10,
            smooth_iterations: 3,
            smooth_lambda: 0.5,
        }
    }
}

impl ReconstructionConfig {
    /// Check every field against its documented range.
    ///
    /// The pipeline validates before the first stage; an out-of-range value
    /// is reported as [`ReconError::Input`] against the stage that would
    /// consume it.
    pub fn validate(&self) -> Result<(), ReconError> {
        if self.octree_depth == 0 || self.octree_depth > MAX_OCTREE_DEPTH {
            return Err(ReconError::input(
                Stage::Surface,
                format!(
                    "octree_depth {} outside 1..={MAX_OCTREE_DEPTH}",
                    self.octree_depth
                ),
            ));
        }
        if self.grid_resolution < 2 || self.grid_resolution > 256 {
            return Err(ReconError::input(
                Stage::Surface,
                format!("grid_resolution {} outside 2..=256", self.grid_resolution),
            ));
        }
        if !(self.decimation_ratio > 0.0 && self.decimation_ratio <= 1.0) {
            return Err(ReconError::input(
                Stage::Decimate,
                format!("decimation_ratio {} outside (0, 1]", self.decimation_ratio),
            ));
        }
        if self.atlas_size < 2 || self.atlas_size > 16384 {
            return Err(ReconError::input(
                Stage::Bake,
                format!("atlas_size {} outside 2..=16384", self.atlas_size),
            ));
        }
        if self.max_disparity == 0 {
            return Err(ReconError::input(
                Stage::Stereo,
                "max_disparity must be positive",
            ));
        }
        if self.block_radius == 0 {
            return Err(ReconError::input(
                Stage::Stereo,
                "block_radius must be positive",
            ));
        }
        if self.neighborhood_size < 2 {
            return Err(ReconError::input(
                Stage::Cloud,
                format!("neighborhood_size {} below 2", self.neighborhood_size),
            ));
        }
        if !(self.outlier_std_mult > 0.0) {
            return Err(ReconError::input(
                Stage::Cloud,
                format!("outlier_std_mult {} must be positive", self.outlier_std_mult),
            ));
        }
        if !(self.match_ratio > 0.0 && self.match_ratio < 1.0) {
            return Err(ReconError::input(
                Stage::Features,
                format!("match_ratio {} outside (0, 1)", self.match_ratio),
            ));
        }
        if self.bundle_iterations == 0 {
            return Err(ReconError::input(
                Stage::Sfm,
                "bundle_iterations must be positive",
            ));
        }
        if !(self.smooth_lambda > 0.0 && self.smooth_lambda <= 1.0) {
            return Err(ReconError::input(
                Stage::Surface,
                format!("smooth_lambda {} outside (0, 1]", self.smooth_lambda),
            ));
        }
        Ok(())
    }
}
