/// Multiply two 3x3 row-major matrices into `out`.
pub fn matmul33(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3], out: &mut [[f64; 3]; 3]) {
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
}

/// Multiply a 3x3 row-major matrix with a 3-vector.
#[inline]
pub fn mat3_mul_vec3(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Transpose a 3x3 row-major matrix.
#[inline]
pub fn mat3_transpose(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

/// Apply a rigid transform to a set of points: `dst[i] = r * src[i] + t`.
///
/// PRECONDITION: `src` and `dst` have the same length.
pub fn transform_points3d(
    src: &[[f64; 3]],
    r: &[[f64; 3]; 3],
    t: &[f64; 3],
    dst: &mut [[f64; 3]],
) {
    debug_assert_eq!(src.len(), dst.len());
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        let rs = mat3_mul_vec3(r, s);
        d[0] = rs[0] + t[0];
        d[1] = rs[1] + t[1];
        d[2] = rs[2] + t[2];
    }
}

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation.
/// * `angle` - The angle of rotation in radians.
///
/// # Returns
///
/// The rotation matrix, or an error for a zero axis.
pub fn axis_angle_to_rotation_matrix(
    axis: &[f64; 3],
    angle: f64,
) -> Result<[[f64; 3]; 3], &'static str> {
    let axis_norm = {
        let magnitude = (axis[0].powi(2) + axis[1].powi(2) + axis[2].powi(2)).sqrt();
        match magnitude < 1e-10 {
            true => return Err("cannot compute rotation matrix from a zero vector"),
            false => [
                axis[0] / magnitude,
                axis[1] / magnitude,
                axis[2] / magnitude,
            ],
        }
    };

    let x = axis_norm[0];
    let y = axis_norm[1];
    let z = axis_norm[2];

    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;

    Ok([
        [c + x * x * t, x * y * t - z * s, x * z * t + y * s],
        [y * x * t + z * s, c + y * y * t, y * z * t - x * s],
        [z * x * t - y * s, z * y * t + x * s, c + z * z * t],
    ])
}

/// Compute the rotation matrix for a rotation vector (axis scaled by angle).
///
/// A vector close to zero yields the identity.
pub fn rotation_vector_to_matrix(rvec: &[f64; 3]) -> [[f64; 3]; 3] {
    let angle = (rvec[0].powi(2) + rvec[1].powi(2) + rvec[2].powi(2)).sqrt();
    if angle < 1e-12 {
        return [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    }
    // the axis is normalized inside, safe to ignore the zero-vector error
    axis_angle_to_rotation_matrix(rvec, angle)
        .unwrap_or([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
}

/// Compute the rotation vector (axis scaled by angle) of a rotation matrix.
///
/// The inverse of [`rotation_vector_to_matrix`]. Stable for angles near zero
/// and near pi.
pub fn rotation_matrix_to_vector(r: &[[f64; 3]; 3]) -> [f64; 3] {
    let trace = r[0][0] + r[1][1] + r[2][2];
    let cos_angle = ((trace - 1.0) / 2.0).clamp(-1.0, 1.0);
    let angle = cos_angle.acos();

    if angle < 1e-10 {
        return [0.0, 0.0, 0.0];
    }

    if (std::f64::consts::PI - angle).abs() < 1e-6 {
        // near pi the off-diagonal formula degenerates; use the diagonal
        let xx = ((r[0][0] + 1.0) / 2.0).max(0.0).sqrt();
        let yy = ((r[1][1] + 1.0) / 2.0).max(0.0).sqrt();
        let zz = ((r[2][2] + 1.0) / 2.0).max(0.0).sqrt();
        // fix signs from the off-diagonal sums
        let x = xx;
        let y = if r[0][1] + r[1][0] >= 0.0 { yy } else { -yy };
        let z = if r[0][2] + r[2][0] >= 0.0 { zz } else { -zz };
        let norm = (x * x + y * y + z * z).sqrt().max(1e-12);
        return [angle * x / norm, angle * y / norm, angle * z / norm];
    }

    let scale = angle / (2.0 * angle.sin());
    [
        scale * (r[2][1] - r[1][2]),
        scale * (r[0][2] - r[2][0]),
        scale * (r[1][0] - r[0][1]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn axis_angle_quarter_turn() -> Result<(), Box<dyn std::error::Error>> {
        let rotation = axis_angle_to_rotation_matrix(&[1.0, 0.0, 0.0], std::f64::consts::PI / 2.0)?;
        let expected = [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(rotation[i][j], expected[i][j], epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn rotation_vector_roundtrip() {
        let rvec = [0.3, -0.5, 0.8];
        let r = rotation_vector_to_matrix(&rvec);
        let back = rotation_matrix_to_vector(&r);
        for i in 0..3 {
            assert_relative_eq!(back[i], rvec[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn rotation_vector_identity() {
        let r = rotation_vector_to_matrix(&[0.0, 0.0, 0.0]);
        assert_relative_eq!(r[0][0], 1.0);
        assert_relative_eq!(r[1][1], 1.0);
        assert_relative_eq!(r[2][2], 1.0);
        let rvec = rotation_matrix_to_vector(&r);
        assert_eq!(rvec, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn matmul_and_transpose() {
        let r = rotation_vector_to_matrix(&[0.1, 0.2, 0.3]);
        let rt = mat3_transpose(&r);
        let mut out = [[0.0; 3]; 3];
        matmul33(&r, &rt, &mut out);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(out[i][j], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn transform_points_identity() {
        let src = vec![[1.0, 2.0, 3.0]];
        let mut dst = vec![[0.0; 3]];
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        transform_points3d(&src, &identity, &[1.0, 0.0, -1.0], &mut dst);
        assert_eq!(dst[0], [2.0, 2.0, 2.0]);
    }
}
