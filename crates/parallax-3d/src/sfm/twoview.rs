use rand::prelude::*;
use rand::SeedableRng;

use parallax_image::CameraIntrinsics;

use crate::linalg::mat3_mul_vec3;
use crate::sfm::essential::{decompose_essential, essential_8point, sampson_distance};
use crate::sfm::triangulate::triangulate_point_linear;
use crate::sfm::SfmError;

/// Parameters for RANSAC model estimation.
#[derive(Clone, Copy, Debug)]
pub struct RansacParams {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Inlier threshold on the Sampson error, in normalized image units.
    pub threshold: f64,
    /// Minimum number of inliers required for acceptance.
    pub min_inliers: usize,
    /// Optional RNG seed for deterministic runs.
    pub random_seed: Option<u64>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            threshold: 2e-3,
            min_inliers: 15,
            random_seed: Some(0),
        }
    }
}

/// Result of a RANSAC model fit.
#[derive(Clone, Debug)]
pub struct RansacResult<M> {
    /// Estimated model.
    pub model: M,
    /// Per-point inlier mask.
    pub inliers: Vec<bool>,
    /// Total inlier count.
    pub inlier_count: usize,
    /// Sum of inlier errors (lower is better).
    pub score: f64,
}

/// Configuration for two-view relative pose estimation.
#[derive(Clone, Debug)]
pub struct TwoViewConfig {
    /// RANSAC settings for the essential matrix.
    pub ransac: RansacParams,
    /// Minimum parallax angle (degrees) for triangulated points.
    pub min_parallax_deg: f64,
}

impl Default for TwoViewConfig {
    fn default() -> Self {
        Self {
            ransac: RansacParams::default(),
            min_parallax_deg: 0.5,
        }
    }
}

/// Output of two-view relative pose estimation.
///
/// The first camera sits at the world origin; `rotation` and `translation`
/// map points from the first camera frame into the second. The translation
/// has unit norm, fixing the scene scale to the baseline.
#[derive(Clone, Debug)]
pub struct TwoViewResult {
    /// Relative rotation from view 1 to view 2.
    pub rotation: [[f64; 3]; 3],
    /// Relative translation direction from view 1 to view 2 (unit norm).
    pub translation: [f64; 3],
    /// Triangulated 3D points, in the frame of the first camera.
    pub points3d: Vec<[f64; 3]>,
    /// For each triangulated point, the index of the correspondence it came from.
    pub point_indices: Vec<usize>,
    /// Per-correspondence inlier mask from RANSAC.
    pub inliers: Vec<bool>,
    /// Total inlier count.
    pub inlier_count: usize,
}

/// Estimate an essential matrix with RANSAC using the 8-point solver.
///
/// The correspondences must be in normalized image coordinates.
pub fn ransac_essential(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
    params: &RansacParams,
) -> Result<RansacResult<[[f64; 3]; 3]>, SfmError> {
    if x1.len() != x2.len() || x1.len() < 8 {
        return Err(SfmError::InvalidInput {
            required: 8,
            actual: x1.len().min(x2.len()),
        });
    }

    let mut rng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => {
            let mut tr = rand::rng();
            StdRng::from_rng(&mut tr)
        }
    };

    let n = x1.len();
    let mut best_model = None;
    let mut best_inliers = Vec::new();
    let mut best_count = 0usize;
    let mut best_score = f64::INFINITY;

    for _ in 0..params.max_iterations {
        let sample = rand::seq::index::sample(&mut rng, n, 8);
        let mut s1 = Vec::with_capacity(8);
        let mut s2 = Vec::with_capacity(8);
        for idx in sample.iter() {
            s1.push(x1[idx]);
            s2.push(x2[idx]);
        }
        let e = match essential_8point(&s1, &s2) {
            Ok(e) => e,
            Err(_) => continue,
        };

        let mut inliers = vec![false; n];
        let mut count = 0usize;
        let mut score = 0.0f64;
        for i in 0..n {
            let d = sampson_distance(&e, &x1[i], &x2[i]);
            if d <= params.threshold * params.threshold {
                inliers[i] = true;
                count += 1;
                score += d;
            }
        }

        if count > best_count || (count == best_count && score < best_score) {
            best_model = Some(e);
            best_inliers = inliers;
            best_count = count;
            best_score = score;
        }
    }

    let model = match best_model {
        Some(m) if best_count >= params.min_inliers => m,
        _ => {
            return Err(SfmError::RansacFailure {
                inlier_count: best_count,
                min_inliers: params.min_inliers,
            })
        }
    };

    // refit on all inliers for a tighter model
    let mut in1 = Vec::with_capacity(best_count);
    let mut in2 = Vec::with_capacity(best_count);
    for i in 0..n {
        if best_inliers[i] {
            in1.push(x1[i]);
            in2.push(x2[i]);
        }
    }
    let model = essential_8point(&in1, &in2).unwrap_or(model);

    Ok(RansacResult {
        model,
        inliers: best_inliers,
        inlier_count: best_count,
        score: best_score,
    })
}

/// Estimate the relative pose between two views from pixel correspondences.
///
/// Runs RANSAC on the essential matrix, decomposes it into the four pose
/// candidates and selects the one placing the most triangulated points in
/// front of both cameras. Points behind either camera or with parallax below
/// the configured minimum are dropped.
pub fn estimate_two_view(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
    k1: &CameraIntrinsics,
    k2: &CameraIntrinsics,
    config: &TwoViewConfig,
) -> Result<TwoViewResult, SfmError> {
    if x1.len() != x2.len() || x1.len() < 8 {
        return Err(SfmError::InvalidInput {
            required: 8,
            actual: x1.len().min(x2.len()),
        });
    }

    let x1n: Vec<[f64; 2]> = x1.iter().map(|p| k1.normalize_point(p)).collect();
    let x2n: Vec<[f64; 2]> = x2.iter().map(|p| k2.normalize_point(p)).collect();

    let ransac = ransac_essential(&x1n, &x2n, &config.ransac)?;
    let candidates = decompose_essential(&ransac.model);

    let mut best: Option<([[f64; 3]; 3], [f64; 3])> = None;
    let mut best_count = 0usize;
    let mut best_points = Vec::new();
    let mut best_indices = Vec::new();

    for (r, t) in candidates {
        let mut points = Vec::new();
        let mut indices = Vec::new();
        for i in 0..x1n.len() {
            if !ransac.inliers[i] {
                continue;
            }
            if let Some(p) = triangulate_point_linear(&x1n[i], &x2n[i], &r, &t) {
                let q = mat3_mul_vec3(&r, &p);
                let q = [q[0] + t[0], q[1] + t[1], q[2] + t[2]];
                if p[2] > 0.0 && q[2] > 0.0 && parallax_ok(&p, &q, config.min_parallax_deg) {
                    points.push(p);
                    indices.push(i);
                }
            }
        }
        if points.len() > best_count {
            best_count = points.len();
            best = Some((r, t));
            best_points = points;
            best_indices = indices;
        }
    }

    let (rotation, translation) = best.ok_or(SfmError::CheiralityFailure)?;
    log::debug!(
        "two-view pose: {} ransac inliers, {} cheirality-consistent points",
        ransac.inlier_count,
        best_count
    );

    Ok(TwoViewResult {
        rotation,
        translation,
        points3d: best_points,
        point_indices: best_indices,
        inliers: ransac.inliers,
        inlier_count: ransac.inlier_count,
    })
}

fn parallax_ok(x1: &[f64; 3], x2: &[f64; 3], min_parallax_deg: f64) -> bool {
    let dot = x1[0] * x2[0] + x1[1] * x2[1] + x1[2] * x2[2];
    let n1 = (x1[0] * x1[0] + x1[1] * x1[1] + x1[2] * x1[2]).sqrt();
    let n2 = (x2[0] * x2[0] + x2[1] * x2[1] + x2[2] * x2[2]).sqrt();
    if n1 <= 1e-12 || n2 <= 1e-12 {
        return false;
    }
    let cos_angle = (dot / (n1 * n2)).clamp(-1.0, 1.0);
    cos_angle.acos().to_degrees() >= min_parallax_deg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::rotation_vector_to_matrix;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new((500.0, 500.0), (320.0, 240.0), (640, 480))
    }

    /// Pixel correspondences of a synthetic rig: cam1 at origin, cam2 offset.
    fn synthetic_views(
        r: &[[f64; 3]; 3],
        t: &[f64; 3],
        n: usize,
    ) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
        let k = intrinsics();
        let mut x1 = Vec::new();
        let mut x2 = Vec::new();
        let mut i = 0usize;
        while x1.len() < n {
            let p = [
                (i as f64 * 0.59).sin() * 1.2,
                (i as f64 * 0.83).cos() * 0.9,
                4.0 + (i as f64 * 0.31).sin() * 1.5,
            ];
            i += 1;
            let q = mat3_mul_vec3(r, &p);
            let q = [q[0] + t[0], q[1] + t[1], q[2] + t[2]];
            if q[2] <= 0.1 {
                continue;
            }
            x1.push(k.denormalize_point(&[p[0] / p[2], p[1] / p[2]]));
            x2.push(k.denormalize_point(&[q[0] / q[2], q[1] / q[2]]));
        }
        (x1, x2)
    }

    #[test]
    fn recovers_known_pose() -> Result<(), SfmError> {
        let r_true = rotation_vector_to_matrix(&[0.0, 0.08, 0.0]);
        let t_true = [1.0, 0.0, 0.0];
        let (x1, x2) = synthetic_views(&r_true, &t_true, 60);

        let result = estimate_two_view(&x1, &x2, &intrinsics(), &intrinsics(), &TwoViewConfig::default())?;

        // translation is up to scale, compare directions
        let t = &result.translation;
        let norm = (t[0] * t[0] + t[1] * t[1] + t[2] * t[2]).sqrt();
        assert_relative_eq!((t[0] / norm).abs(), 1.0, epsilon = 1e-3);

        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(result.rotation[i][j], r_true[i][j], epsilon = 1e-3);
            }
        }
        assert!(result.points3d.len() >= 50);

        // triangulated points must reproject onto their observations
        let k = intrinsics();
        for (p, &idx) in result.points3d.iter().zip(result.point_indices.iter()) {
            let expected = k.normalize_point(&x1[idx]);
            assert_relative_eq!(p[0] / p[2], expected[0], epsilon = 1e-6);
            assert_relative_eq!(p[1] / p[2], expected[1], epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn too_few_matches_is_an_error() {
        let x = vec![[0.0, 0.0]; 5];
        let err = estimate_two_view(&x, &x, &intrinsics(), &intrinsics(), &TwoViewConfig::default());
        assert!(matches!(err, Err(SfmError::InvalidInput { required: 8, actual: 5 })));
    }

    #[test]
    fn uncorrelated_matches_fail_ransac() {
        // independent scatter on both sides supports no epipolar geometry
        let mut x1 = Vec::new();
        let mut x2 = Vec::new();
        for i in 0..30 {
            let a = i as f64;
            x1.push([320.0 + (a * 12.9898).sin() * 250.0, 240.0 + (a * 78.233).sin() * 180.0]);
            x2.push([320.0 + (a * 39.425).cos() * 250.0, 240.0 + (a * 11.135).cos() * 180.0]);
        }
        let result =
            estimate_two_view(&x1, &x2, &intrinsics(), &intrinsics(), &TwoViewConfig::default());
        assert!(matches!(result, Err(SfmError::RansacFailure { .. })));
    }
}
