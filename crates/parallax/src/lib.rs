#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use parallax_image as image;

#[doc(inline)]
pub use parallax_features as features;

#[doc(inline)]
pub use parallax_3d as p3d;

#[doc(inline)]
pub use parallax_mesh as mesh;

#[doc(inline)]
pub use parallax_texture as texture;

#[doc(inline)]
pub use parallax_io as io;

#[doc(inline)]
pub use parallax_recon as recon;
