use std::fmt;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Keypoint detection, description and pairwise matching.
    Features,
    /// Camera pose estimation and sparse triangulation.
    Sfm,
    /// Dense stereo disparity and depth.
    Stereo,
    /// Point cloud fusion, outlier filtering and normal estimation.
    Cloud,
    /// Implicit surface solve, iso-surface extraction and smoothing.
    Surface,
    /// Quadric mesh decimation.
    Decimate,
    /// Conformal UV parameterization.
    Unwrap,
    /// Texture atlas baking.
    Bake,
}

impl Stage {
    /// Every stage, in the order the pipeline runs them.
    pub const ALL: [Stage; 8] = [
        Stage::Features,
        Stage::Sfm,
        Stage::Stereo,
        Stage::Cloud,
        Stage::Surface,
        Stage::Decimate,
        Stage::Unwrap,
        Stage::Bake,
    ];

    /// The stage name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Features => "features",
            Stage::Sfm => "sfm",
            Stage::Stereo => "stereo",
            Stage::Cloud => "cloud",
            Stage::Surface => "surface",
            Stage::Decimate => "decimate",
            Stage::Unwrap => "unwrap",
            Stage::Bake => "bake",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error raised by the reconstruction pipeline.
///
/// Every variant names the stage it surfaced in; the reason strings carry
/// the diagnostic counts of the failure (matches found versus required,
/// points left after filtering, and so on).
#[derive(thiserror::Error, Debug)]
pub enum ReconError {
    /// The input images or configuration cannot drive a reconstruction.
    #[error("unusable input at the {stage} stage: {reason}")]
    Input {
        /// Stage that rejected the input.
        stage: Stage,
        /// What was wrong with it.
        reason: String,
    },

    /// The observed scene geometry is degenerate.
    #[error("degenerate geometry at the {stage} stage: {reason}")]
    Geometry {
        /// Stage that detected the degeneracy.
        stage: Stage,
        /// The degenerate configuration, with counts.
        reason: String,
    },

    /// A stage ran but produced no usable output.
    #[error("the {stage} stage produced no usable output: {reason}")]
    Reconstruction {
        /// Stage whose output was unusable.
        stage: Stage,
        /// What came out of it, with counts.
        reason: String,
    },

    /// An allocation, image buffer or file operation failed.
    #[error("resource failure at the {stage} stage: {reason}")]
    Resource {
        /// Stage the failure surfaced in.
        stage: Stage,
        /// The underlying failure.
        reason: String,
    },

    /// The run was cancelled through its [`crate::hooks::CancelToken`].
    #[error("reconstruction cancelled at the {stage} stage")]
    Cancelled {
        /// Stage that observed the cancellation.
        stage: Stage,
    },
}

impl ReconError {
    pub(crate) fn input(stage: Stage, reason: impl ToString) -> Self {
        Self::Input {
            stage,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn geometry(stage: Stage, reason: impl ToString) -> Self {
        Self::Geometry {
            stage,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn reconstruction(stage: Stage, reason: impl ToString) -> Self {
        Self::Reconstruction {
            stage,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn resource(stage: Stage, reason: impl ToString) -> Self {
        Self::Resource {
            stage,
            reason: reason.to_string(),
        }
    }

    /// The stage the error surfaced in.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Input { stage, .. }
            | Self::Geometry { stage, .. }
            | Self::Reconstruction { stage, .. }
            | Self::Resource { stage, .. }
            | Self::Cancelled { stage } => *stage,
        }
    }
}
