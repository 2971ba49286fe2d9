/// An error type for surface reconstruction and mesh processing.
#[derive(thiserror::Error, Debug)]
pub enum MeshError {
    /// The input cloud does not contain enough points.
    #[error("Cloud with {points} points is too small, {required} required")]
    TooFewPoints {
        /// Number of points in the cloud.
        points: usize,
        /// Minimum number of points required.
        required: usize,
    },

    /// The input cloud carries no normals.
    #[error("The operation requires a cloud with oriented normals")]
    MissingNormals,

    /// The cloud bounds collapse in at least one dimension.
    #[error("Degenerate cloud bounds: extent ({0}, {1}, {2})")]
    DegenerateBounds(f64, f64, f64),

    /// The iso-surface does not intersect any grid cell.
    #[error("The iso-surface is empty at level {iso}")]
    EmptySurface {
        /// The iso level that produced no geometry.
        iso: f64,
    },

    /// A configuration parameter is out of range.
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The mesh is empty or malformed for the requested operation.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(&'static str),
}
