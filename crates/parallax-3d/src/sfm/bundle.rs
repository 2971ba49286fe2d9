use rayon::prelude::*;

use parallax_image::PinholeCamera;

use crate::linalg::{rotation_matrix_to_vector, rotation_vector_to_matrix};
use crate::sfm::SfmError;

/// A single 2D observation of a 3D point by a camera.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Index into the camera array.
    pub camera_idx: usize,
    /// Index into the point array.
    pub point_idx: usize,
    /// Observed pixel coordinate.
    pub pixel: [f64; 2],
}

/// Parameters controlling the bundle adjustment.
#[derive(Debug, Clone)]
pub struct BundleAdjustParams {
    /// Maximum number of outer iterations.
    pub max_iters: usize,
    /// Convergence threshold on the relative RMSE decrease.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
    /// Keep the first camera fixed to pin the gauge.
    pub fix_first_camera: bool,
}

impl Default for BundleAdjustParams {
    fn default() -> Self {
        Self {
            max_iters: 10,
            eps: 1e-9,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
            fix_first_camera: true,
        }
    }
}

/// Summary of a bundle adjustment run.
#[derive(Debug, Clone)]
pub struct BundleAdjustSummary {
    /// Reprojection RMSE before optimization, in pixels.
    pub initial_rmse: f64,
    /// Reprojection RMSE after optimization, in pixels.
    pub final_rmse: f64,
    /// Number of outer iterations performed.
    pub iterations: usize,
    /// Whether the relative improvement fell below the tolerance.
    pub converged: bool,
}

/// Parameter block for one camera: axis-angle rotation and translation.
#[derive(Clone, Copy)]
struct PoseBlock {
    x: [f64; 6],
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
}

impl PoseBlock {
    fn from_camera(camera: &PinholeCamera) -> Self {
        let rvec = rotation_matrix_to_vector(&camera.extrinsics.rotation);
        let t = camera.extrinsics.translation;
        Self {
            x: [rvec[0], rvec[1], rvec[2], t[0], t[1], t[2]],
            fx: camera.intrinsics.focal_length.0,
            fy: camera.intrinsics.focal_length.1,
            cx: camera.intrinsics.principal_point.0,
            cy: camera.intrinsics.principal_point.1,
        }
    }

    fn write_to(&self, camera: &mut PinholeCamera) {
        camera.extrinsics.rotation =
            rotation_vector_to_matrix(&[self.x[0], self.x[1], self.x[2]]);
        camera.extrinsics.translation = [self.x[3], self.x[4], self.x[5]];
    }

    /// Reprojection residual of a world point against an observed pixel.
    fn residual(&self, point: &[f64; 3], pixel: &[f64; 2]) -> [f64; 2] {
        let r = rotation_vector_to_matrix(&[self.x[0], self.x[1], self.x[2]]);
        residual_with_rotation(&r, &self.x, self, point, pixel)
    }
}

fn residual_with_rotation(
    r: &[[f64; 3]; 3],
    x: &[f64; 6],
    k: &PoseBlock,
    point: &[f64; 3],
    pixel: &[f64; 2],
) -> [f64; 2] {
    let pc = [
        r[0][0] * point[0] + r[0][1] * point[1] + r[0][2] * point[2] + x[3],
        r[1][0] * point[0] + r[1][1] * point[1] + r[1][2] * point[2] + x[4],
        r[2][0] * point[0] + r[2][1] * point[1] + r[2][2] * point[2] + x[5],
    ];
    // points sliding behind the camera keep a finite, large residual
    let inv_z = 1.0 / pc[2].max(1e-9);
    let u = k.fx * pc[0] * inv_z + k.cx;
    let v = k.fy * pc[1] * inv_z + k.cy;
    [u - pixel[0], v - pixel[1]]
}

/// Refine camera poses and 3D points by minimizing pixel reprojection error.
///
/// One outer iteration performs a damped Gauss-Newton step on every camera
/// pose (6 parameters each, numeric central-difference Jacobian, normal
/// equations solved densely) followed by a parallel damped step on every
/// point (3 parameters each). Steps that increase the global error are
/// rolled back and the damping raised, as in Levenberg-Marquardt. The
/// iteration stops early when the relative RMSE improvement drops below
/// `eps` or when `stop` returns true.
///
/// The first camera is held fixed by default to pin the gauge.
pub fn bundle_adjust(
    cameras: &mut [PinholeCamera],
    points: &mut [[f64; 3]],
    observations: &[Observation],
    params: &BundleAdjustParams,
    stop: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<BundleAdjustSummary, SfmError> {
    for (index, obs) in observations.iter().enumerate() {
        if obs.camera_idx >= cameras.len() || obs.point_idx >= points.len() {
            return Err(SfmError::InvalidObservation {
                index,
                camera: obs.camera_idx,
                point: obs.point_idx,
            });
        }
    }
    if observations.is_empty() {
        return Err(SfmError::InvalidInput {
            required: 1,
            actual: 0,
        });
    }

    let mut poses: Vec<PoseBlock> = cameras.iter().map(PoseBlock::from_camera).collect();

    // observation indices grouped per camera and per point
    let mut obs_by_camera: Vec<Vec<usize>> = vec![Vec::new(); cameras.len()];
    let mut obs_by_point: Vec<Vec<usize>> = vec![Vec::new(); points.len()];
    for (i, obs) in observations.iter().enumerate() {
        obs_by_camera[obs.camera_idx].push(i);
        obs_by_point[obs.point_idx].push(i);
    }

    let rmse = |poses: &[PoseBlock], points: &[[f64; 3]]| -> f64 {
        let sum_sq: f64 = observations
            .iter()
            .map(|obs| {
                let r = poses[obs.camera_idx].residual(&points[obs.point_idx], &obs.pixel);
                r[0] * r[0] + r[1] * r[1]
            })
            .sum();
        (sum_sq / observations.len() as f64).sqrt()
    };

    let initial_rmse = rmse(&poses, points);
    let mut err = initial_rmse;
    let mut lambda = params.lambda_init;
    let mut iterations = 0usize;
    let mut converged = false;

    while iterations < params.max_iters {
        if let Some(stop) = stop {
            if stop() {
                break;
            }
        }
        iterations += 1;

        let poses_backup = poses.clone();
        let points_backup = points.to_vec();

        // pose pass
        let first = usize::from(params.fix_first_camera);
        for c in first..poses.len() {
            if obs_by_camera[c].len() < 3 {
                continue;
            }
            step_pose(&mut poses[c], &obs_by_camera[c], observations, points, lambda);
        }

        // point pass, each point is independent given the poses
        let new_points: Vec<[f64; 3]> = (0..points.len())
            .into_par_iter()
            .map(|j| {
                if obs_by_point[j].is_empty() {
                    return points[j];
                }
                step_point(&points[j], &obs_by_point[j], observations, &poses, lambda)
            })
            .collect();
        points.copy_from_slice(&new_points);

        let new_err = rmse(&poses, points);
        log::debug!(
            "bundle adjust iter {}: rmse {:.6} -> {:.6} (lambda {:.1e})",
            iterations,
            err,
            new_err,
            lambda
        );

        if new_err < err {
            let improvement = (err - new_err) / err.max(f64::EPSILON);
            err = new_err;
            lambda = (lambda / params.lambda_mul).max(1e-12);
            if improvement < params.eps {
                converged = true;
                break;
            }
        } else {
            poses = poses_backup;
            points.copy_from_slice(&points_backup);
            lambda *= params.lambda_mul;
            if lambda > 1e9 {
                break;
            }
        }
    }

    for (pose, camera) in poses.iter().zip(cameras.iter_mut()) {
        pose.write_to(camera);
    }

    Ok(BundleAdjustSummary {
        initial_rmse,
        final_rmse: err,
        iterations,
        converged,
    })
}

/// One damped Gauss-Newton step on a 6-parameter pose block.
fn step_pose(
    pose: &mut PoseBlock,
    obs_indices: &[usize],
    observations: &[Observation],
    points: &[[f64; 3]],
    lambda: f64,
) {
    let m = obs_indices.len();
    let mut residuals = vec![0.0f64; 2 * m];
    let mut jacobian = vec![0.0f64; 2 * m * 6];

    let eval = |x: &[f64; 6], out: &mut [f64]| -> f64 {
        let r = rotation_vector_to_matrix(&[x[0], x[1], x[2]]);
        let mut sum_sq = 0.0;
        for (row, &oi) in obs_indices.iter().enumerate() {
            let obs = &observations[oi];
            let res = residual_with_rotation(&r, x, pose, &points[obs.point_idx], &obs.pixel);
            out[2 * row] = res[0];
            out[2 * row + 1] = res[1];
            sum_sq += res[0] * res[0] + res[1] * res[1];
        }
        sum_sq
    };

    let err_base = eval(&pose.x, &mut residuals);

    // numeric central differences
    const H_ROT: f64 = 1e-6;
    let t_scale = pose.x[3]
        .abs()
        .max(pose.x[4].abs())
        .max(pose.x[5].abs())
        .max(1.0);
    let h_trans = 1e-6 * t_scale;

    let mut plus = vec![0.0f64; 2 * m];
    let mut minus = vec![0.0f64; 2 * m];
    for k in 0..6 {
        let h = if k < 3 { H_ROT } else { h_trans };
        let mut x_plus = pose.x;
        let mut x_minus = pose.x;
        x_plus[k] += h;
        x_minus[k] -= h;
        eval(&x_plus, &mut plus);
        eval(&x_minus, &mut minus);
        for i in 0..2 * m {
            jacobian[i * 6 + k] = (plus[i] - minus[i]) / (2.0 * h);
        }
    }

    // normal equations (J^T J + lambda I) delta = -J^T r
    let mut a = [[0.0f64; 6]; 6];
    let mut b = [0.0f64; 6];
    for i in 0..2 * m {
        let r_val = residuals[i];
        for c in 0..6 {
            let j_ic = jacobian[i * 6 + c];
            b[c] -= j_ic * r_val;
            for d in c..6 {
                a[c][d] += j_ic * jacobian[i * 6 + d];
            }
        }
    }
    for c in 0..6 {
        for d in 0..c {
            a[c][d] = a[d][c];
        }
        a[c][c] += lambda;
    }

    if let Some(delta) = solve_dense::<6>(&mut a, &mut b) {
        let mut x_new = pose.x;
        for i in 0..6 {
            x_new[i] += delta[i];
        }
        let err_new = eval(&x_new, &mut plus);
        if err_new < err_base {
            pose.x = x_new;
        }
    }
}

/// One damped Gauss-Newton step on a 3-parameter point.
fn step_point(
    point: &[f64; 3],
    obs_indices: &[usize],
    observations: &[Observation],
    poses: &[PoseBlock],
    lambda: f64,
) -> [f64; 3] {
    let eval = |p: &[f64; 3]| -> f64 {
        obs_indices
            .iter()
            .map(|&oi| {
                let obs = &observations[oi];
                let r = poses[obs.camera_idx].residual(p, &obs.pixel);
                r[0] * r[0] + r[1] * r[1]
            })
            .sum()
    };

    let m = obs_indices.len();
    let mut residuals = vec![0.0f64; 2 * m];
    for (row, &oi) in obs_indices.iter().enumerate() {
        let obs = &observations[oi];
        let r = poses[obs.camera_idx].residual(point, &obs.pixel);
        residuals[2 * row] = r[0];
        residuals[2 * row + 1] = r[1];
    }
    let err_base: f64 = residuals.iter().map(|r| r * r).sum();

    let scale = point[0].abs().max(point[1].abs()).max(point[2].abs()).max(1.0);
    let h = 1e-6 * scale;
    let mut jacobian = vec![0.0f64; 2 * m * 3];
    for k in 0..3 {
        let mut p_plus = *point;
        let mut p_minus = *point;
        p_plus[k] += h;
        p_minus[k] -= h;
        for (row, &oi) in obs_indices.iter().enumerate() {
            let obs = &observations[oi];
            let rp = poses[obs.camera_idx].residual(&p_plus, &obs.pixel);
            let rm = poses[obs.camera_idx].residual(&p_minus, &obs.pixel);
            jacobian[(2 * row) * 3 + k] = (rp[0] - rm[0]) / (2.0 * h);
            jacobian[(2 * row + 1) * 3 + k] = (rp[1] - rm[1]) / (2.0 * h);
        }
    }

    let mut a = [[0.0f64; 3]; 3];
    let mut b = [0.0f64; 3];
    for i in 0..2 * m {
        let r_val = residuals[i];
        for c in 0..3 {
            let j_ic = jacobian[i * 3 + c];
            b[c] -= j_ic * r_val;
            for d in c..3 {
                a[c][d] += j_ic * jacobian[i * 3 + d];
            }
        }
    }
    for c in 0..3 {
        for d in 0..c {
            a[c][d] = a[d][c];
        }
        a[c][c] += lambda;
    }

    if let Some(delta) = solve_dense::<3>(&mut a, &mut b) {
        let candidate = [point[0] + delta[0], point[1] + delta[1], point[2] + delta[2]];
        if eval(&candidate) < err_base {
            return candidate;
        }
    }
    *point
}

/// Dense Gaussian elimination with partial pivoting.
fn solve_dense<const N: usize>(a: &mut [[f64; N]; N], b: &mut [f64; N]) -> Option<[f64; N]> {
    for i in 0..N {
        // pivot
        let mut piv = i;
        let mut max_val = a[i][i].abs();
        for r in (i + 1)..N {
            let v = a[r][i].abs();
            if v > max_val {
                max_val = v;
                piv = r;
            }
        }
        if max_val < 1e-15 {
            return None;
        }
        if piv != i {
            a.swap(i, piv);
            b.swap(i, piv);
        }

        // eliminate below
        for r in (i + 1)..N {
            let factor = a[r][i] / a[i][i];
            for c in i..N {
                a[r][c] -= factor * a[i][c];
            }
            b[r] -= factor * b[i];
        }
    }

    // back substitution
    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let mut sum = b[i];
        for c in (i + 1)..N {
            sum -= a[i][c] * x[c];
        }
        x[i] = sum / a[i][i];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_image::{CameraExtrinsics, CameraIntrinsics};

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new((500.0, 500.0), (320.0, 240.0), (640, 480))
    }

    fn camera_at(eye: [f64; 3]) -> PinholeCamera {
        PinholeCamera::new(
            intrinsics(),
            CameraExtrinsics::look_at(&eye, &[0.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).unwrap(),
        )
    }

    fn cube_points() -> Vec<[f64; 3]> {
        let mut points = Vec::new();
        for &x in &[-0.5, 0.5] {
            for &y in &[-0.5, 0.5] {
                for &z in &[-0.5, 0.5] {
                    points.push([x, y, z]);
                }
            }
        }
        // a few interior points to stabilize the geometry
        points.push([0.2, 0.1, -0.3]);
        points.push([-0.1, 0.4, 0.2]);
        points.push([0.3, -0.2, 0.1]);
        points
    }

    fn observe_all(cameras: &[PinholeCamera], points: &[[f64; 3]]) -> Vec<Observation> {
        let mut observations = Vec::new();
        for (ci, camera) in cameras.iter().enumerate() {
            for (pi, point) in points.iter().enumerate() {
                if let Some(pixel) = camera.project(point) {
                    observations.push(Observation {
                        camera_idx: ci,
                        point_idx: pi,
                        pixel,
                    });
                }
            }
        }
        observations
    }

    #[test]
    fn perfect_input_stays_put() -> Result<(), SfmError> {
        let mut cameras = vec![camera_at([0.0, 0.5, -3.0]), camera_at([1.0, 0.3, -2.8])];
        let mut points = cube_points();
        let observations = observe_all(&cameras, &points);

        let summary = bundle_adjust(
            &mut cameras,
            &mut points,
            &observations,
            &BundleAdjustParams::default(),
            None,
        )?;

        assert!(summary.initial_rmse < 1e-9);
        assert!(summary.final_rmse <= summary.initial_rmse + 1e-12);
        Ok(())
    }

    #[test]
    fn reduces_error_from_perturbed_points() -> Result<(), SfmError> {
        let mut cameras = vec![
            camera_at([0.0, 0.5, -3.0]),
            camera_at([1.2, 0.3, -2.8]),
            camera_at([-1.0, 0.8, -2.9]),
        ];
        let points_true = cube_points();
        let observations = observe_all(&cameras, &points_true);

        // perturb the points, keep cameras exact
        let mut points: Vec<[f64; 3]> = points_true
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let d = 0.03 * ((i as f64 * 0.7).sin());
                [p[0] + d, p[1] - d, p[2] + 0.5 * d]
            })
            .collect();

        let summary = bundle_adjust(
            &mut cameras,
            &mut points,
            &observations,
            &BundleAdjustParams::default(),
            None,
        )?;

        assert!(summary.initial_rmse > 1.0);
        assert!(summary.final_rmse < 0.1 * summary.initial_rmse);
        Ok(())
    }

    #[test]
    fn reduces_error_from_perturbed_pose() -> Result<(), SfmError> {
        let mut cameras = vec![camera_at([0.0, 0.5, -3.0]), camera_at([1.2, 0.3, -2.8])];
        let mut points = cube_points();
        let observations = observe_all(&cameras, &points);

        // perturb the second camera translation
        cameras[1].extrinsics.translation[0] += 0.05;
        cameras[1].extrinsics.translation[2] -= 0.03;

        let summary = bundle_adjust(
            &mut cameras,
            &mut points,
            &observations,
            &BundleAdjustParams {
                max_iters: 20,
                ..Default::default()
            },
            None,
        )?;

        assert!(summary.final_rmse < 0.2 * summary.initial_rmse);
        Ok(())
    }

    #[test]
    fn invalid_observation_is_rejected() {
        let mut cameras = vec![camera_at([0.0, 0.0, -3.0])];
        let mut points = vec![[0.0, 0.0, 0.0]];
        let observations = vec![Observation {
            camera_idx: 2,
            point_idx: 0,
            pixel: [0.0, 0.0],
        }];
        let result = bundle_adjust(
            &mut cameras,
            &mut points,
            &observations,
            &BundleAdjustParams::default(),
            None,
        );
        assert!(matches!(result, Err(SfmError::InvalidObservation { .. })));
    }

    #[test]
    fn stop_predicate_halts_early() -> Result<(), SfmError> {
        let mut cameras = vec![camera_at([0.0, 0.5, -3.0]), camera_at([1.2, 0.3, -2.8])];
        let mut points = cube_points();
        let observations = observe_all(&cameras, &points);
        points[0][0] += 0.5;

        let summary = bundle_adjust(
            &mut cameras,
            &mut points,
            &observations,
            &BundleAdjustParams::default(),
            Some(&|| true),
        )?;
        assert_eq!(summary.iterations, 0);
        Ok(())
    }
}
