use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use parallax_image::{Image, ImageSize, PinholeCamera};
use rayon::prelude::*;

use crate::pointcloud::PointCloud;
use crate::stereo::DepthMap;

/// An error type for point cloud operations.
#[derive(thiserror::Error, Debug)]
pub enum CloudError {
    /// The cloud does not contain enough points for the operation.
    #[error("Cloud with {points} points is too small, {required} required")]
    TooFewPoints {
        /// Number of points in the cloud.
        points: usize,
        /// Minimum number of points required.
        required: usize,
    },

    /// The color image does not match the depth map dimensions.
    #[error("Color image size {0} does not match depth map size {1}")]
    SizeMismatch(ImageSize, ImageSize),
}

/// Configuration for statistical outlier removal.
#[derive(Debug, Clone)]
pub struct OutlierFilterConfig {
    /// Number of nearest neighbors used to compute the mean distance.
    pub k: usize,
    /// Points whose mean distance exceeds `mean + std_mult * stddev`
    /// are removed.
    pub std_mult: f64,
}

impl Default for OutlierFilterConfig {
    fn default() -> Self {
        Self {
            k: 20,
            std_mult: 2.0,
        }
    }
}

/// Configuration for normal estimation.
#[derive(Debug, Clone)]
pub struct NormalEstimationConfig {
    /// Number of nearest neighbors in the local covariance.
    pub k: usize,
}

impl Default for NormalEstimationConfig {
    fn default() -> Self {
        Self { k: 20 }
    }
}

/// Back-project a depth map into a world-space point cloud.
///
/// Every pixel with a positive depth contributes one point. When a color
/// image is given it must match the depth map size and the point color is
/// sampled at the same pixel.
pub fn cloud_from_depth(
    depth: &DepthMap,
    camera: &PinholeCamera,
    color: Option<&Image<u8, 3>>,
) -> Result<PointCloud, CloudError> {
    if let Some(color) = color {
        if color.size() != depth.size() {
            return Err(CloudError::SizeMismatch(color.size(), depth.size()));
        }
    }

    let width = depth.width();
    let depth_data = depth.as_slice();

    let mut points = Vec::new();
    let mut colors = color.map(|_| Vec::new());
    for (i, &z) in depth_data.iter().enumerate() {
        if z <= 0.0 {
            continue;
        }
        let x = i % width;
        let y = i / width;
        let pixel = [x as f64, y as f64];
        points.push(camera.back_project(&pixel, z as f64));
        if let (Some(colors), Some(color)) = (colors.as_mut(), color) {
            let rgb = color.as_slice();
            colors.push([rgb[i * 3], rgb[i * 3 + 1], rgb[i * 3 + 2]]);
        }
    }

    Ok(PointCloud::new(points, colors, None))
}

/// Remove points whose mean distance to their neighbors is anomalous.
///
/// Computes for every point the mean distance to its `k` nearest neighbors,
/// then retains the points whose mean stays within
/// `mean + std_mult * stddev` of the global distribution. `k` is clamped to
/// the cloud size minus one.
pub fn remove_statistical_outliers(
    cloud: &PointCloud,
    config: &OutlierFilterConfig,
) -> Result<PointCloud, CloudError> {
    let points = cloud.points();
    if points.len() < 2 {
        return Err(CloudError::TooFewPoints {
            points: points.len(),
            required: 2,
        });
    }
    let k = config.k.min(points.len() - 1);

    let tree: ImmutableKdTree<f64, u32, 3, 32> = ImmutableKdTree::new_from_slice(points);

    // mean distance to the k nearest neighbors, skipping the point itself
    let mean_distances: Vec<f64> = points
        .par_iter()
        .map(|p| {
            let neighbors =
                tree.nearest_n::<SquaredEuclidean>(p, std::num::NonZero::new(k + 1).unwrap());
            let sum: f64 = neighbors.iter().skip(1).map(|n| n.distance.sqrt()).sum();
            sum / k as f64
        })
        .collect();

    let n = mean_distances.len() as f64;
    let mean = mean_distances.iter().sum::<f64>() / n;
    let variance = mean_distances
        .iter()
        .map(|d| (d - mean) * (d - mean))
        .sum::<f64>()
        / n;
    let threshold = mean + config.std_mult * variance.sqrt();

    let mask: Vec<bool> = mean_distances.iter().map(|&d| d <= threshold).collect();
    let filtered = cloud.select(&mask);
    log::debug!(
        "outlier removal: {} -> {} points (threshold {:.4})",
        points.len(),
        filtered.points().len(),
        threshold
    );
    Ok(filtered)
}

/// Estimate oriented per-point normals from the local neighborhood.
///
/// The normal of a point is the direction of least variance of its `k`
/// nearest neighbors, i.e. the singular vector of the smallest singular
/// value of the local covariance. Normals are flipped to face the nearest
/// of the given viewpoints; with no viewpoints they face away from the
/// cloud centroid.
pub fn estimate_normals(
    cloud: &PointCloud,
    config: &NormalEstimationConfig,
    viewpoints: &[[f64; 3]],
) -> Result<Vec<[f64; 3]>, CloudError> {
    let points = cloud.points();
    if points.len() < 3 {
        return Err(CloudError::TooFewPoints {
            points: points.len(),
            required: 3,
        });
    }
    let k = config.k.min(points.len() - 1);

    let tree: ImmutableKdTree<f64, u32, 3, 32> = ImmutableKdTree::new_from_slice(points);
    let centroid = cloud.centroid();

    let normals = points
        .par_iter()
        .map(|p| {
            let neighbors =
                tree.nearest_n::<SquaredEuclidean>(p, std::num::NonZero::new(k + 1).unwrap());

            // local centroid
            let mut c = [0.0f64; 3];
            for n in &neighbors {
                let q = &points[n.item as usize];
                c[0] += q[0];
                c[1] += q[1];
                c[2] += q[2];
            }
            let inv = 1.0 / neighbors.len() as f64;
            c[0] *= inv;
            c[1] *= inv;
            c[2] *= inv;

            // covariance of the neighborhood
            let mut cov = [[0.0f64; 3]; 3];
            for n in &neighbors {
                let q = &points[n.item as usize];
                let d = [q[0] - c[0], q[1] - c[1], q[2] - c[2]];
                for r in 0..3 {
                    for s in 0..3 {
                        cov[r][s] += d[r] * d[s];
                    }
                }
            }

            let mut normal = smallest_direction(&cov);

            // orient toward the closest viewpoint
            let toward = match nearest_viewpoint(p, viewpoints) {
                Some(v) => [v[0] - p[0], v[1] - p[1], v[2] - p[2]],
                None => [p[0] - centroid[0], p[1] - centroid[1], p[2] - centroid[2]],
            };
            let dot = normal[0] * toward[0] + normal[1] * toward[1] + normal[2] * toward[2];
            if dot < 0.0 {
                normal = [-normal[0], -normal[1], -normal[2]];
            }
            normal
        })
        .collect();

    Ok(normals)
}

/// Singular vector of the smallest singular value of a symmetric 3x3 matrix.
fn smallest_direction(cov: &[[f64; 3]; 3]) -> [f64; 3] {
    let mut m = faer::Mat::<f64>::zeros(3, 3);
    for r in 0..3 {
        for s in 0..3 {
            m.write(r, s, cov[r][s]);
        }
    }
    let svd = m.svd();
    let u = svd.u();
    let v = [u.col(2)[0], u.col(2)[1], u.col(2)[2]];
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if norm < f64::EPSILON {
        return [0.0, 0.0, 1.0];
    }
    [v[0] / norm, v[1] / norm, v[2] / norm]
}

fn nearest_viewpoint(p: &[f64; 3], viewpoints: &[[f64; 3]]) -> Option<[f64; 3]> {
    viewpoints
        .iter()
        .min_by(|a, b| {
            let da = dist_sq(p, a);
            let db = dist_sq(p, b);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .copied()
}

fn dist_sq(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
}
