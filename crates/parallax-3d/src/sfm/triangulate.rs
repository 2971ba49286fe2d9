use parallax_image::CameraExtrinsics;

/// Triangulate a point from two normalized observations, camera 1 at the origin.
///
/// Solves the DLT system built from `P1 = [I | 0]` and `P2 = [R | t]` with an
/// SVD and dehomogenizes the null vector. Returns `None` when the
/// homogeneous scale is degenerate.
pub fn triangulate_point_linear(
    x1: &[f64; 2],
    x2: &[f64; 2],
    r: &[[f64; 3]; 3],
    t: &[f64; 3],
) -> Option<[f64; 3]> {
    let p1 = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];
    let p2 = [
        [r[0][0], r[0][1], r[0][2], t[0]],
        [r[1][0], r[1][1], r[1][2], t[1]],
        [r[2][0], r[2][1], r[2][2], t[2]],
    ];

    solve_dlt(&p1, &p2, x1, x2)
}

/// Triangulate a world point seen by two arbitrary cameras.
///
/// The observations must be normalized image coordinates; the camera
/// extrinsics map world to camera space.
pub fn triangulate_world(
    e1: &CameraExtrinsics,
    e2: &CameraExtrinsics,
    x1: &[f64; 2],
    x2: &[f64; 2],
) -> Option<[f64; 3]> {
    let p1 = projection_rows(e1);
    let p2 = projection_rows(e2);
    solve_dlt(&p1, &p2, x1, x2)
}

fn projection_rows(e: &CameraExtrinsics) -> [[f64; 4]; 3] {
    let r = &e.rotation;
    let t = &e.translation;
    [
        [r[0][0], r[0][1], r[0][2], t[0]],
        [r[1][0], r[1][1], r[1][2], t[1]],
        [r[2][0], r[2][1], r[2][2], t[2]],
    ]
}

fn solve_dlt(
    p1: &[[f64; 4]; 3],
    p2: &[[f64; 4]; 3],
    x1: &[f64; 2],
    x2: &[f64; 2],
) -> Option<[f64; 3]> {
    let mut a = faer::Mat::<f64>::zeros(4, 4);
    write_dlt_row(&mut a, 0, x1[0], &p1[2], &p1[0]);
    write_dlt_row(&mut a, 1, x1[1], &p1[2], &p1[1]);
    write_dlt_row(&mut a, 2, x2[0], &p2[2], &p2[0]);
    write_dlt_row(&mut a, 3, x2[1], &p2[2], &p2[1]);

    let svd = a.svd();
    let v = svd.v();
    let xh = v.col(3);
    let w = xh[3];
    if w.abs() < 1e-12 {
        return None;
    }
    Some([xh[0] / w, xh[1] / w, xh[2] / w])
}

fn write_dlt_row(a: &mut faer::Mat<f64>, row: usize, x: f64, p3: &[f64; 4], p1: &[f64; 4]) {
    for j in 0..4 {
        a.write(row, j, x * p3[j] - p1[j]);
    }
}
