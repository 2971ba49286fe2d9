use parallax_image::Image;
use rayon::prelude::*;

use crate::error::FeatureError;

/// A detected corner with subpixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    /// Horizontal pixel coordinate.
    pub x: f32,
    /// Vertical pixel coordinate.
    pub y: f32,
    /// Harris corner response at the detection site.
    pub response: f32,
}

/// Configuration for the Harris corner detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Half size of the gradient accumulation window (window is 2r+1).
    pub block_radius: usize,
    /// Harris response constant.
    pub harris_k: f32,
    /// Minimum response for a corner to be kept.
    pub response_threshold: f32,
    /// Maximum number of keypoints kept per image, strongest first.
    pub max_keypoints: usize,
    /// Keypoints closer than this to the border are dropped. Must cover the
    /// descriptor patch half width.
    pub border_margin: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            block_radius: 1,
            harris_k: 0.04,
            response_threshold: 1e-4,
            max_keypoints: 2000,
            border_margin: 16,
        }
    }
}

/// Detect Harris corners with 3x3 non-maximum suppression.
///
/// Gradients are computed with Sobel kernels, the structure tensor is
/// accumulated over a `(2r+1)x(2r+1)` window and the response is
/// `det - k * trace^2`. Local maxima above the threshold are refined to
/// subpixel by fitting a parabola to the response along each axis.
///
/// Returns at most `max_keypoints` corners sorted by decreasing response.
/// An image without corners yields an empty vector.
pub fn detect_corners(
    gray: &Image<f32, 1>,
    config: &DetectorConfig,
) -> Result<Vec<KeyPoint>, FeatureError> {
    let width = gray.width();
    let height = gray.height();
    let min_size = 2 * (config.border_margin + config.block_radius + 2);
    if width < min_size || height < min_size {
        return Err(FeatureError::ImageTooSmall(width, height, min_size));
    }

    let (ix, iy) = sobel_gradients(gray);

    // structure tensor response, row parallel
    let r = config.block_radius as i64;
    let mut responses = vec![0.0f32; width * height];
    responses
        .par_chunks_exact_mut(width)
        .enumerate()
        .for_each(|(y, response_row)| {
            if y < config.block_radius + 1 || y >= height - config.block_radius - 1 {
                return;
            }
            for (x, response) in response_row
                .iter_mut()
                .enumerate()
                .take(width - config.block_radius - 1)
                .skip(config.block_radius + 1)
            {
                let mut i_xx = 0.0f32;
                let mut i_yy = 0.0f32;
                let mut i_xy = 0.0f32;
                for by in -r..=r {
                    for bx in -r..=r {
                        let idx = (y as i64 + by) as usize * width + (x as i64 + bx) as usize;
                        let gx = ix[idx];
                        let gy = iy[idx];
                        i_xx += gx * gx;
                        i_yy += gy * gy;
                        i_xy += gx * gy;
                    }
                }
                let det = i_xx * i_yy - i_xy * i_xy;
                let trace = i_xx + i_yy;
                *response = det - config.harris_k * trace * trace;
            }
        });

    // non-maximum suppression over the 8-neighborhood with subpixel refinement
    let margin = config.border_margin.max(config.block_radius + 1);
    let mut keypoints = Vec::new();
    for y in margin..height - margin {
        for x in margin..width - margin {
            let idx = y * width + x;
            let response = responses[idx];
            if response <= config.response_threshold {
                continue;
            }

            let mut is_max = true;
            'nms: for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nidx = (y as i64 + dy) as usize * width + (x as i64 + dx) as usize;
                    if responses[nidx] > response {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if !is_max {
                continue;
            }

            let sub_x = refine_peak(responses[idx - 1], response, responses[idx + 1]);
            let sub_y = refine_peak(responses[idx - width], response, responses[idx + width]);
            keypoints.push(KeyPoint {
                x: x as f32 + sub_x,
                y: y as f32 + sub_y,
                response,
            });
        }
    }

    keypoints.sort_unstable_by(|a, b| b.response.total_cmp(&a.response));
    keypoints.truncate(config.max_keypoints);

    Ok(keypoints)
}

/// Parabolic peak refinement along one axis, clamped to half a pixel.
#[inline]
fn refine_peak(left: f32, center: f32, right: f32) -> f32 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Sobel x/y gradients over the full image. Border pixels are left at zero.
fn sobel_gradients(gray: &Image<f32, 1>) -> (Vec<f32>, Vec<f32>) {
    let width = gray.width();
    let height = gray.height();
    let src = gray.as_slice();

    let mut ix = vec![0.0f32; width * height];
    let mut iy = vec![0.0f32; width * height];

    ix.par_chunks_exact_mut(width)
        .zip(iy.par_chunks_exact_mut(width))
        .enumerate()
        .for_each(|(y, (ix_row, iy_row))| {
            if y == 0 || y == height - 1 {
                return;
            }
            let up = &src[(y - 1) * width..y * width];
            let mid = &src[y * width..(y + 1) * width];
            let down = &src[(y + 1) * width..(y + 2) * width];
            for x in 1..width - 1 {
                ix_row[x] = (up[x + 1] - up[x - 1])
                    + 2.0 * (mid[x + 1] - mid[x - 1])
                    + (down[x + 1] - down[x - 1]);
                iy_row[x] = (down[x - 1] - up[x - 1])
                    + 2.0 * (down[x] - up[x])
                    + (down[x + 1] - up[x + 1]);
            }
        });

    (ix, iy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_image::{ImageError, ImageSize};

    /// Checkerboard with 8 pixel squares, strong corners everywhere inside.
    fn checkerboard(width: usize, height: usize) -> Result<Image<f32, 1>, ImageError> {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let v = if ((x / 8) + (y / 8)) % 2 == 0 { 1.0 } else { 0.0 };
                data.push(v);
            }
        }
        Image::new(
            ImageSize {
                width,
                height,
            },
            data,
        )
    }

    #[test]
    fn detects_checkerboard_corners() -> Result<(), Box<dyn std::error::Error>> {
        let image = checkerboard(96, 96)?;
        let keypoints = detect_corners(&image, &DetectorConfig::default())?;
        assert!(!keypoints.is_empty());
        // all inside the margin, allowing half a pixel of subpixel refinement
        for kp in &keypoints {
            assert!(kp.x >= 15.5 && kp.x <= 80.5);
            assert!(kp.y >= 15.5 && kp.y <= 80.5);
            assert!(kp.response > 0.0);
        }
        Ok(())
    }

    #[test]
    fn flat_image_has_no_corners() -> Result<(), Box<dyn std::error::Error>> {
        let image = Image::<f32, 1>::from_size_val(
            ImageSize {
                width: 96,
                height: 96,
            },
            0.5,
        )?;
        let keypoints = detect_corners(&image, &DetectorConfig::default())?;
        assert!(keypoints.is_empty());
        Ok(())
    }

    #[test]
    fn respects_keypoint_cap() -> Result<(), Box<dyn std::error::Error>> {
        let image = checkerboard(128, 128)?;
        let config = DetectorConfig {
            max_keypoints: 5,
            ..Default::default()
        };
        let keypoints = detect_corners(&image, &config)?;
        assert!(keypoints.len() <= 5);
        // sorted strongest first
        for pair in keypoints.windows(2) {
            assert!(pair[0].response >= pair[1].response);
        }
        Ok(())
    }

    #[test]
    fn tiny_image_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let image = Image::<f32, 1>::from_size_val(
            ImageSize {
                width: 8,
                height: 8,
            },
            0.0,
        )?;
        assert!(detect_corners(&image, &DetectorConfig::default()).is_err());
        Ok(())
    }
}
