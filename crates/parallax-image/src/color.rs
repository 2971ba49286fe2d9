use crate::error::ImageError;
use crate::image::Image;

/// Define the RGB weights for the grayscale conversion.
const RW: f64 = 0.299;
const GW: f64 = 0.587;
const BW: f64 = 0.114;

/// Convert an RGB image to grayscale using the formula:
///
/// Y = 0.299 * R + 0.587 * G + 0.114 * B
///
/// # Arguments
///
/// * `src` - The input RGB image.
/// * `dst` - The output grayscale image.
///
/// Precondition: the input and output images must have the same size.
///
/// # Example
///
/// ```
/// use parallax_image::{Image, ImageSize};
/// use parallax_image::color::gray_from_rgb;
///
/// let image = Image::<f32, 3>::new(
///     ImageSize {
///         width: 4,
///         height: 5,
///     },
///     vec![0f32; 4 * 5 * 3],
/// )
/// .unwrap();
///
/// let mut gray = Image::<f32, 1>::from_size_val(image.size(), 0.0).unwrap();
///
/// gray_from_rgb(&image, &mut gray).unwrap();
/// assert_eq!(gray.num_channels(), 1);
/// ```
pub fn gray_from_rgb(src: &Image<f32, 3>, dst: &mut Image<f32, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::SizeMismatch(
            src.width(),
            src.height(),
            dst.width(),
            dst.height(),
        ));
    }

    let rw = RW as f32;
    let gw = GW as f32;
    let bw = BW as f32;

    for (src_pixel, dst_pixel) in src
        .as_slice()
        .chunks_exact(3)
        .zip(dst.as_slice_mut().iter_mut())
    {
        *dst_pixel = rw * src_pixel[0] + gw * src_pixel[1] + bw * src_pixel[2];
    }

    Ok(())
}

/// Convert an RGB8 image to grayscale using fixed point arithmetic:
///
/// Y = (77 * R + 150 * G + 29 * B) >> 8
pub fn gray_from_rgb_u8(src: &Image<u8, 3>, dst: &mut Image<u8, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::SizeMismatch(
            src.width(),
            src.height(),
            dst.width(),
            dst.height(),
        ));
    }

    for (src_pixel, dst_pixel) in src
        .as_slice()
        .chunks_exact(3)
        .zip(dst.as_slice_mut().iter_mut())
    {
        let r = src_pixel[0] as u16;
        let g = src_pixel[1] as u16;
        let b = src_pixel[2] as u16;
        *dst_pixel = ((77 * r + 150 * g + 29 * b) >> 8) as u8;
    }

    Ok(())
}
