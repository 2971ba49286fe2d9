/// Errors produced by parameterization and baking.
#[derive(thiserror::Error, Debug)]
pub enum TextureError {
    /// The mesh has no triangles to parameterize or bake.
    #[error("mesh with {vertices} vertices and {triangles} triangles cannot be textured")]
    EmptyMesh {
        /// Number of vertices in the mesh.
        vertices: usize,
        /// Number of triangles in the mesh.
        triangles: usize,
    },

    /// The mesh carries no UV coordinates.
    #[error("mesh has no UV coordinates, unwrap it before baking")]
    MissingUvs,

    /// No posed views were supplied to the baker.
    #[error("texture baking requires at least one posed view")]
    NoViews,

    /// A numeric parameter is outside its valid range.
    #[error("invalid parameter {name}: {value}")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// An image buffer could not be created.
    #[error(transparent)]
    Image(#[from] parallax_image::error::ImageError),
}
