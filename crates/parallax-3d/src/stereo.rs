use parallax_image::{Image, ImageError, ImageSize};
use rayon::prelude::*;

/// A per-pixel disparity map aligned to the left view, invalid pixels are 0.
pub type DisparityMap = Image<f32, 1>;

/// A per-pixel depth map aligned to the left view, invalid pixels are 0.
pub type DepthMap = Image<f32, 1>;

/// An error type for stereo matching operations.
#[derive(thiserror::Error, Debug)]
pub enum StereoError {
    /// The left and right images have different dimensions.
    #[error("Left and right image dimensions do not match ({0} vs {1})")]
    SizeMismatch(ImageSize, ImageSize),

    /// The image is too small for the requested block radius.
    #[error("Image {0} is too small for block radius {1}")]
    ImageTooSmall(ImageSize, usize),

    /// The stereo geometry is invalid.
    #[error("Invalid stereo geometry: baseline {baseline}, focal length {focal}")]
    InvalidGeometry {
        /// The camera baseline.
        baseline: f64,
        /// The focal length in pixels.
        focal: f64,
    },

    /// An image creation error.
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Configuration for rectified block matching.
#[derive(Debug, Clone)]
pub struct StereoConfig {
    /// Half size of the matching block, the window is `2r + 1` squared.
    pub block_radius: usize,
    /// Largest disparity searched, inclusive.
    pub max_disparity: usize,
    /// Maximum disparity difference tolerated by the left-right check.
    pub lr_tolerance: f32,
    /// Blocks whose cost spread over the search stays below this floor
    /// are treated as textureless and marked invalid.
    pub texture_threshold: f32,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            block_radius: 3,
            max_disparity: 64,
            lr_tolerance: 1.0,
            texture_threshold: 0.01,
        }
    }
}

/// Which image drives the scan, the other one is searched.
#[derive(Clone, Copy, PartialEq)]
enum ScanSide {
    Left,
    Right,
}

/// Compute a disparity map for a rectified grayscale pair.
///
/// For every pixel of the left view the right view is searched along the
/// same row with a squared-difference block cost, winner-take-all over
/// `0..=max_disparity`. Matches that fail the left-right consistency check
/// or fall in textureless blocks are marked invalid (disparity 0). The
/// winning disparity is refined to subpixel precision by fitting a parabola
/// through the neighboring costs. Rows are processed in parallel.
pub fn block_match_disparity(
    left: &Image<f32, 1>,
    right: &Image<f32, 1>,
    config: &StereoConfig,
) -> Result<DisparityMap, StereoError> {
    if left.size() != right.size() {
        return Err(StereoError::SizeMismatch(left.size(), right.size()));
    }
    let width = left.width();
    let height = left.height();
    let radius = config.block_radius;
    if width <= 2 * radius + 1 || height <= 2 * radius + 1 {
        return Err(StereoError::ImageTooSmall(left.size(), radius));
    }

    let mut disparity = vec![0.0f32; width * height];
    disparity
        .par_chunks_exact_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            if y < radius || y + radius >= height {
                return;
            }
            let left_row = scan_row(left, right, y, config, ScanSide::Left);
            let right_row = scan_row(left, right, y, config, ScanSide::Right);

            for x in radius..width - radius {
                let d = left_row[x];
                if d < 0.0 {
                    continue;
                }
                let xr = x as isize - d.round() as isize;
                if xr < 0 {
                    continue;
                }
                let d_other = right_row[xr as usize];
                if d_other >= 0.0 && (d - d_other).abs() <= config.lr_tolerance {
                    row[x] = d;
                }
            }
        });

    Ok(Image::new(left.size(), disparity)?)
}

/// Winner-take-all disparity scan of one row, invalid entries are -1.
fn scan_row(
    left: &Image<f32, 1>,
    right: &Image<f32, 1>,
    y: usize,
    config: &StereoConfig,
    side: ScanSide,
) -> Vec<f32> {
    let width = left.width();
    let radius = config.block_radius;
    let mut out = vec![-1.0f32; width];

    let (base, other) = match side {
        ScanSide::Left => (left, right),
        ScanSide::Right => (right, left),
    };

    let mut costs = Vec::with_capacity(config.max_disparity + 1);
    for x in radius..width - radius {
        // the right view sees the point shifted to the left
        let d_max = match side {
            ScanSide::Left => config.max_disparity.min(x - radius),
            ScanSide::Right => config.max_disparity.min(width - 1 - radius - x),
        };

        let mut best_d = 0usize;
        let mut best_cost = f32::INFINITY;
        let mut worst_cost = 0.0f32;
        costs.clear();
        for d in 0..=d_max {
            let ox = match side {
                ScanSide::Left => x - d,
                ScanSide::Right => x + d,
            };
            let cost = block_cost(base, other, x, ox, y, radius);
            costs.push(cost);
            if cost < best_cost {
                best_cost = cost;
                best_d = d;
            }
            if cost > worst_cost {
                worst_cost = cost;
            }
        }

        if worst_cost - best_cost < config.texture_threshold {
            continue;
        }

        // parabola through the neighboring costs
        let mut d_refined = best_d as f32;
        if best_d > 0 && best_d < d_max {
            let c_minus = costs[best_d - 1];
            let c_plus = costs[best_d + 1];
            let denom = c_minus - 2.0 * best_cost + c_plus;
            if denom > f32::EPSILON {
                let offset = (0.5 * (c_minus - c_plus) / denom).clamp(-0.5, 0.5);
                d_refined += offset;
            }
        }
        out[x] = d_refined;
    }

    out
}

/// Sum of squared differences between two blocks on the same row.
fn block_cost(
    base: &Image<f32, 1>,
    other: &Image<f32, 1>,
    bx: usize,
    ox: usize,
    y: usize,
    radius: usize,
) -> f32 {
    let width = base.width();
    let base_data = base.as_slice();
    let other_data = other.as_slice();
    let mut sum = 0.0f32;
    for dy in 0..=2 * radius {
        let row = (y + dy - radius) * width;
        let b = &base_data[row + bx - radius..=row + bx + radius];
        let o = &other_data[row + ox - radius..=row + ox + radius];
        for (bv, ov) in b.iter().zip(o.iter()) {
            let diff = bv - ov;
            sum += diff * diff;
        }
    }
    sum
}

/// Convert a disparity map into a depth map.
///
/// `depth = baseline * focal / disparity`; invalid disparities (zero or
/// negative) map to zero depth.
pub fn depth_from_disparity(
    disparity: &DisparityMap,
    baseline: f64,
    focal: f64,
) -> Result<DepthMap, StereoError> {
    if baseline <= 0.0 || focal <= 0.0 {
        return Err(StereoError::InvalidGeometry { baseline, focal });
    }
    let scale = (baseline * focal) as f32;
    let depth = disparity
        .as_slice()
        .iter()
        .map(|&d| if d > 0.0 { scale / d } else { 0.0 })
        .collect();
    Ok(Image::new(disparity.size(), depth)?)
}
