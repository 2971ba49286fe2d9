/// An error type for the image module.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    /// Error when the data length does not match the image size.
    #[error("Data length ({0}) does not match the image size ({1})")]
    InvalidChannelShape(usize, usize),

    /// Error when the channel index is out of bounds.
    #[error("Channel index ({0}) is out of bounds ({1})")]
    ChannelIndexOutOfBounds(usize, usize),

    /// Error when a pixel coordinate falls outside the image.
    #[error("Pixel coordinate ({0}, {1}) is out of bounds for image {2}x{3}")]
    PixelOutOfBounds(usize, usize, usize, usize),

    /// Error when two images that must agree in size do not.
    #[error("Image sizes do not match ({0}x{1} vs {2}x{3})")]
    SizeMismatch(usize, usize, usize, usize),

    /// Error when casting between pixel types fails.
    #[error("Failed to cast the pixel data")]
    CastError,
}
