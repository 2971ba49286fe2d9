use crate::linalg::{matmul33, mat3_mul_vec3, mat3_transpose};
use crate::sfm::SfmError;

/// Estimate the essential matrix using the 8-point algorithm.
///
/// The correspondences must be in normalized image coordinates (pixels
/// mapped through the inverse intrinsics). The points are re-centered and
/// scaled internally for conditioning and the (1, 1, 0) singular value
/// constraint is enforced on the result.
///
/// # Arguments
///
/// * `x1` - Normalized points in view 1 (length >= 8).
/// * `x2` - Corresponding normalized points in view 2 (same length).
pub fn essential_8point(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
) -> Result<[[f64; 3]; 3], SfmError> {
    if x1.len() != x2.len() || x1.len() < 8 {
        return Err(SfmError::InvalidInput {
            required: 8,
            actual: x1.len().min(x2.len()),
        });
    }

    // condition the points with similarity transforms t1, t2
    let (x1n, t1) = normalize_points_2d(x1);
    let (x2n, t2) = normalize_points_2d(x2);

    // build the design matrix a (n x 9) for x2' * E * x1 = 0
    let n = x1n.len();
    let mut a = faer::Mat::<f64>::zeros(n, 9);
    for i in 0..n {
        let (x, y) = (x1n[i][0], x1n[i][1]);
        let (xp, yp) = (x2n[i][0], x2n[i][1]);
        a.write(i, 0, xp * x);
        a.write(i, 1, xp * y);
        a.write(i, 2, xp);
        a.write(i, 3, yp * x);
        a.write(i, 4, yp * y);
        a.write(i, 5, yp);
        a.write(i, 6, x);
        a.write(i, 7, y);
        a.write(i, 8, 1.0);
    }

    // solve a * e = 0 via SVD: take the last column of v
    let svd = a.svd();
    let evec = svd.v().col(8);
    let e = [
        [evec[0], evec[1], evec[2]],
        [evec[3], evec[4], evec[5]],
        [evec[6], evec[7], evec[8]],
    ];

    // undo the conditioning: E = T2^T * E * T1
    let t2t = mat3_transpose(&t2);
    let mut tmp = [[0.0; 3]; 3];
    let mut e_denorm = [[0.0; 3]; 3];
    matmul33(&t2t, &e, &mut tmp);
    matmul33(&tmp, &t1, &mut e_denorm);

    Ok(enforce_essential_constraints(&e_denorm))
}

/// Enforce the (1, 1, 0) singular value constraint on an essential matrix.
pub fn enforce_essential_constraints(e: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let (u, v) = svd3_uv(e);
    // E = U * diag(1, 1, 0) * V^T
    let mut s = [[0.0; 3]; 3];
    s[0][0] = 1.0;
    s[1][1] = 1.0;
    let vt = mat3_transpose(&v);
    let mut us = [[0.0; 3]; 3];
    let mut out = [[0.0; 3]; 3];
    matmul33(&u, &s, &mut us);
    matmul33(&us, &vt, &mut out);
    out
}

/// Decompose an essential matrix into four possible (R, t) solutions.
///
/// Returns the candidate poses where R is 3x3 row-major and t is a unit
/// 3-vector. The correct candidate must be selected with a cheirality test.
pub fn decompose_essential(e: &[[f64; 3]; 3]) -> Vec<([[f64; 3]; 3], [f64; 3])> {
    let (mut u, mut v) = svd3_uv(e);

    if det3(&u) < 0.0 {
        for row in u.iter_mut() {
            row[2] = -row[2];
        }
    }
    if det3(&v) < 0.0 {
        for row in v.iter_mut() {
            row[2] = -row[2];
        }
    }

    let w = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
    let wt = mat3_transpose(&w);
    let vt = mat3_transpose(&v);

    let mut uw = [[0.0; 3]; 3];
    let mut uwt = [[0.0; 3]; 3];
    let mut r1 = [[0.0; 3]; 3];
    let mut r2 = [[0.0; 3]; 3];
    matmul33(&u, &w, &mut uw);
    matmul33(&uw, &vt, &mut r1);
    matmul33(&u, &wt, &mut uwt);
    matmul33(&uwt, &vt, &mut r2);

    // translation is the last column of u, up to sign
    let t = [u[0][2], u[1][2], u[2][2]];
    let t_neg = [-t[0], -t[1], -t[2]];

    vec![(r1, t), (r1, t_neg), (r2, t), (r2, t_neg)]
}

/// First-order (Sampson) approximation of the squared epipolar error.
pub fn sampson_distance(e: &[[f64; 3]; 3], x1: &[f64; 2], x2: &[f64; 2]) -> f64 {
    let x1h = [x1[0], x1[1], 1.0];
    let x2h = [x2[0], x2[1], 1.0];

    let ex1 = mat3_mul_vec3(e, &x1h);
    let etx2 = mat3_mul_vec3(&mat3_transpose(e), &x2h);

    let x2tex1 = x2h[0] * ex1[0] + x2h[1] * ex1[1] + x2h[2] * ex1[2];
    let denom = ex1[0] * ex1[0] + ex1[1] * ex1[1] + etx2[0] * etx2[0] + etx2[1] * etx2[1];
    if denom < 1e-18 {
        return f64::INFINITY;
    }
    x2tex1 * x2tex1 / denom
}

/// U and V factors of the SVD of a 3x3 row-major matrix.
fn svd3_uv(m: &[[f64; 3]; 3]) -> ([[f64; 3]; 3], [[f64; 3]; 3]) {
    let a = faer::mat![
        [m[0][0], m[0][1], m[0][2]],
        [m[1][0], m[1][1], m[1][2]],
        [m[2][0], m[2][1], m[2][2]]
    ];
    let svd = a.svd();
    let (u_ref, v_ref) = (svd.u(), svd.v());
    let mut u = [[0.0; 3]; 3];
    let mut v = [[0.0; 3]; 3];
    for j in 0..3 {
        let uc = u_ref.col(j);
        let vc = v_ref.col(j);
        for i in 0..3 {
            u[i][j] = uc[i];
            v[i][j] = vc[i];
        }
    }
    (u, v)
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn normalize_points_2d(x: &[[f64; 2]]) -> (Vec<[f64; 2]>, [[f64; 3]; 3]) {
    let n = x.len();
    let (mut mx, mut my) = (0.0, 0.0);
    for p in x {
        mx += p[0];
        my += p[1];
    }
    mx /= n as f64;
    my /= n as f64;
    let mut mean_dist = 0.0;
    for p in x {
        let dx = p[0] - mx;
        let dy = p[1] - my;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n as f64;
    let scale = if mean_dist > 0.0 {
        (2.0f64).sqrt() / mean_dist
    } else {
        1.0
    };

    let mut xn = Vec::with_capacity(n);
    for p in x {
        xn.push([(p[0] - mx) * scale, (p[1] - my) * scale]);
    }

    let t = [
        [scale, 0.0, -scale * mx],
        [0.0, scale, -scale * my],
        [0.0, 0.0, 1.0],
    ];
    (xn, t)
}
