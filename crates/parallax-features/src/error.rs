/// An error type for the features module.
#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    /// Error when the image is too small for the detector window.
    #[error("Image {0}x{1} is smaller than the minimum {2}x{2} required")]
    ImageTooSmall(usize, usize, usize),
}
