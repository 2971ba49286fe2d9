/// An error type for the io module.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Error to manipulate the file.
    #[error("Failed to manipulate the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error to encode the PNG image.
    #[error("Failed to encode the png image. {0}")]
    PngEncodingError(String),

    /// Error to encode or decode the packaged asset.
    #[error("Failed to serialize the asset. {0}")]
    AssetCodecError(String),

    /// The file is not a packaged asset.
    #[error("Bad asset magic {found:?}, expected {expected:?}")]
    BadAssetMagic {
        /// The four bytes found at the start of the file.
        found: [u8; 4],
        /// The expected magic bytes.
        expected: [u8; 4],
    },

    /// Error to rebuild an image from decoded data.
    #[error("Failed to create image. {0}")]
    ImageCreationError(#[from] parallax_image::error::ImageError),
}
