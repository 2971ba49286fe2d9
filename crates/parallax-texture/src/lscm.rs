use std::collections::HashMap;

use glam::DVec3;
use rayon::prelude::*;

use parallax_mesh::TriangleMesh;

use crate::error::TextureError;

/// Parameters of the conformal unwrap.
#[derive(Clone, Debug)]
pub struct UnwrapConfig {
    /// Gauss-Seidel relaxation passes over the free vertices.
    pub iterations: usize,
    /// Margin kept between the chart and the border of the unit square.
    pub margin: f64,
}

impl Default for UnwrapConfig {
    fn default() -> Self {
        Self {
            iterations: 50,
            margin: 0.01,
        }
    }
}

fn cmul(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [a[0] * b[0] - a[1] * b[1], a[0] * b[1] + a[1] * b[0]]
}

fn conj(a: [f64; 2]) -> [f64; 2] {
    [a[0], -a[1]]
}

fn norm_sq(a: [f64; 2]) -> f64 {
    a[0] * a[0] + a[1] * a[1]
}

/// Per-triangle conformal coefficients in the local 2D frame.
struct TriangleCoeffs {
    vertices: [u32; 3],
    /// Cauchy-Riemann weights of the three corners.
    w: [[f64; 2]; 3],
    /// Reciprocal of twice the triangle area.
    inv_2a: f64,
}

fn triangle_coeffs(positions: &[DVec3], tri: &[u32; 3]) -> Option<TriangleCoeffs> {
    let pa = positions[tri[0] as usize];
    let pb = positions[tri[1] as usize];
    let pc = positions[tri[2] as usize];

    let e1 = pb - pa;
    let x_len = e1.length();
    if x_len < 1e-15 {
        return None;
    }
    let cross = e1.cross(pc - pa);
    let double_area = cross.length();
    if double_area < 1e-15 {
        return None;
    }
    let x_axis = e1 / x_len;
    let y_axis = (cross / double_area).cross(x_axis);

    let p = [
        [0.0, 0.0],
        [x_len, 0.0],
        [(pc - pa).dot(x_axis), (pc - pa).dot(y_axis)],
    ];
    // w[m] is the edge opposite corner m, rotated into complex form
    let w = [
        [p[2][0] - p[1][0], p[2][1] - p[1][1]],
        [p[0][0] - p[2][0], p[0][1] - p[2][1]],
        [p[1][0] - p[0][0], p[1][1] - p[0][1]],
    ];
    Some(TriangleCoeffs {
        vertices: *tri,
        w,
        inv_2a: 1.0 / double_area,
    })
}

/// Vertices lying on an edge used by exactly one triangle.
fn boundary_vertices(triangles: &[[u32; 3]]) -> Vec<u32> {
    let mut edge_uses: HashMap<(u32, u32), u32> = HashMap::new();
    for tri in triangles {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            *edge_uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }
    let mut out: Vec<u32> = edge_uses
        .iter()
        .filter(|(_, &uses)| uses == 1)
        .flat_map(|(&(a, b), _)| [a, b])
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// The pair of `candidates` with the largest separation, ties broken
/// towards the smallest index pair.
fn farthest_pair(positions: &[DVec3], candidates: &[u32]) -> (u32, u32) {
    let best = candidates
        .par_iter()
        .enumerate()
        .map(|(i, &a)| {
            let mut best = (f64::NEG_INFINITY, a, a);
            for &b in &candidates[i + 1..] {
                let d = positions[a as usize].distance_squared(positions[b as usize]);
                if d > best.0 {
                    best = (d, a, b);
                }
            }
            best
        })
        .reduce(
            || (f64::NEG_INFINITY, 0, 0),
            |x, y| match x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal) {
                std::cmp::Ordering::Greater => x,
                std::cmp::Ordering::Less => y,
                std::cmp::Ordering::Equal => {
                    if (x.1, x.2) <= (y.1, y.2) {
                        x
                    } else {
                        y
                    }
                }
            },
        );
    (best.1, best.2)
}

/// Compute a conformal UV chart for the mesh and store it in `mesh.uvs`.
///
/// Two anchor vertices are pinned, the farthest-apart boundary pair when
/// the mesh has a boundary and the farthest vertex pair otherwise. The
/// remaining vertices start from a projection onto the anchor plane and
/// are relaxed towards the minimum of the conformal energy. The chart is
/// finally scaled uniformly into the unit square, leaving `margin` on the
/// widest axis.
///
/// `stop` is polled once per relaxation pass; when it returns true the
/// current chart is normalized and returned as is.
pub fn unwrap_mesh(
    mesh: &mut TriangleMesh,
    config: &UnwrapConfig,
    stop: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<(), TextureError> {
    if !(0.0..0.5).contains(&config.margin) {
        return Err(TextureError::InvalidParameter {
            name: "margin",
            value: config.margin,
        });
    }
    if mesh.triangles.is_empty() || mesh.vertices.len() < 3 {
        return Err(TextureError::EmptyMesh {
            vertices: mesh.vertices.len(),
            triangles: mesh.triangles.len(),
        });
    }

    let positions: Vec<DVec3> = mesh.vertices.iter().map(|v| DVec3::from(*v)).collect();
    let n = positions.len();

    let boundary = boundary_vertices(&mesh.triangles);
    let candidates: Vec<u32> = if boundary.len() >= 2 {
        boundary
    } else {
        (0..n as u32).collect()
    };
    let (pin_a, pin_b) = farthest_pair(&positions, &candidates);
    log::debug!("unwrap: pinned vertices {pin_a} and {pin_b}");

    // initial chart projects every vertex onto the anchor plane
    let origin = positions[pin_a as usize];
    let span = positions[pin_b as usize] - origin;
    let e1 = span.normalize_or_zero();
    let seed = if e1.x.abs() < 0.9 { DVec3::X } else { DVec3::Y };
    let e2 = e1.cross(seed).normalize_or_zero().cross(e1);
    let mut uv: Vec<[f64; 2]> = positions
        .iter()
        .map(|p| [(*p - origin).dot(e1), (*p - origin).dot(e2)])
        .collect();

    let coeffs: Vec<TriangleCoeffs> = mesh
        .triangles
        .iter()
        .filter_map(|tri| triangle_coeffs(&positions, tri))
        .collect();
    let mut incident: Vec<Vec<(u32, u8)>> = vec![Vec::new(); n];
    for (t, c) in coeffs.iter().enumerate() {
        for (corner, &v) in c.vertices.iter().enumerate() {
            incident[v as usize].push((t as u32, corner as u8));
        }
    }

    for pass in 0..config.iterations {
        if let Some(stop) = stop {
            if stop() {
                log::debug!("unwrap: relaxation stopped at pass {pass}");
                break;
            }
        }
        for v in 0..n as u32 {
            if v == pin_a || v == pin_b {
                continue;
            }
            let mut num = [0.0f64; 2];
            let mut den = 0.0f64;
            for &(t, corner) in &incident[v as usize] {
                let c = &coeffs[t as usize];
                let mut partial = [0.0f64; 2];
                for m in 0..3 {
                    if m == corner as usize {
                        continue;
                    }
                    let term = cmul(c.w[m], uv[c.vertices[m] as usize]);
                    partial[0] += term[0];
                    partial[1] += term[1];
                }
                let contrib = cmul(conj(c.w[corner as usize]), partial);
                num[0] += contrib[0] * c.inv_2a;
                num[1] += contrib[1] * c.inv_2a;
                den += norm_sq(c.w[corner as usize]) * c.inv_2a;
            }
            if den > 1e-15 {
                uv[v as usize] = [-num[0] / den, -num[1] / den];
            }
        }
    }

    // uniform rescale into the unit square, conformality is preserved
    let (mut min_u, mut max_u) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_v, mut max_v) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in &uv {
        min_u = min_u.min(p[0]);
        max_u = max_u.max(p[0]);
        min_v = min_v.min(p[1]);
        max_v = max_v.max(p[1]);
    }
    let extent = (max_u - min_u).max(max_v - min_v);
    let scale = if extent > 1e-15 {
        (1.0 - 2.0 * config.margin) / extent
    } else {
        0.0
    };
    let center = [(min_u + max_u) * 0.5, (min_v + max_v) * 0.5];
    for p in uv.iter_mut() {
        p[0] = 0.5 + (p[0] - center[0]) * scale;
        p[1] = 0.5 + (p[1] - center[1]) * scale;
    }

    mesh.uvs = Some(uv);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Open grid of `nx` by `ny` vertices in the z = 0 plane.
    fn grid_mesh(nx: usize, ny: usize, dx: f64, dy: f64) -> TriangleMesh {
        let mut vertices = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                vertices.push([i as f64 * dx, j as f64 * dy, 0.0]);
            }
        }
        let mut triangles = Vec::new();
        for j in 0..ny - 1 {
            for i in 0..nx - 1 {
                let v0 = (j * nx + i) as u32;
                let v1 = v0 + 1;
                let v2 = v0 + nx as u32;
                let v3 = v2 + 1;
                triangles.push([v0, v1, v3]);
                triangles.push([v0, v3, v2]);
            }
        }
        TriangleMesh::new(vertices, triangles)
    }

    fn octahedron() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                [1.0, 0.0, 0.0],
                [-1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, -1.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, -1.0],
            ],
            vec![
                [0, 2, 4],
                [2, 1, 4],
                [1, 3, 4],
                [3, 0, 4],
                [2, 0, 5],
                [1, 2, 5],
                [3, 1, 5],
                [0, 3, 5],
            ],
        )
    }

    fn uv_bounds(uvs: &[[f64; 2]]) -> ([f64; 2], [f64; 2]) {
        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for p in uvs {
            for a in 0..2 {
                min[a] = min[a].min(p[a]);
                max[a] = max[a].max(p[a]);
            }
        }
        (min, max)
    }

    #[test]
    fn flat_grid_fills_the_unit_square() -> Result<(), TextureError> {
        let mut mesh = grid_mesh(6, 6, 0.2, 0.2);
        unwrap_mesh(&mut mesh, &UnwrapConfig::default(), None)?;

        let uvs = mesh.uvs.as_ref().unwrap();
        assert_eq!(uvs.len(), 36);
        assert!(uvs.iter().all(|p| p.iter().all(|c| c.is_finite())));

        let (min, max) = uv_bounds(uvs);
        assert!(min[0] >= 0.0 && min[1] >= 0.0);
        assert!(max[0] <= 1.0 && max[1] <= 1.0);
        // a square grid is conformally a square chart
        assert!(max[0] - min[0] > 0.9);
        assert!(max[1] - min[1] > 0.9);
        Ok(())
    }

    #[test]
    fn chart_keeps_the_grid_aspect_ratio() -> Result<(), TextureError> {
        // 1.0 x 0.25 rectangle, the chart must not be stretched square
        let mut mesh = grid_mesh(9, 3, 0.125, 0.125);
        unwrap_mesh(&mut mesh, &UnwrapConfig::default(), None)?;

        // the chart may be rotated, compare side lengths instead of spans
        let uvs = mesh.uvs.as_ref().unwrap();
        let dist = |a: usize, b: usize| {
            let du = uvs[a][0] - uvs[b][0];
            let dv = uvs[a][1] - uvs[b][1];
            (du * du + dv * dv).sqrt()
        };
        let long_side = dist(0, 8);
        let short_side = dist(0, 18);
        let ratio = long_side / short_side;
        assert!((ratio - 4.0).abs() < 0.3, "aspect ratio {ratio}");
        Ok(())
    }

    #[test]
    fn closed_mesh_is_pinned_at_the_farthest_pair() -> Result<(), TextureError> {
        let mut mesh = octahedron();
        unwrap_mesh(&mut mesh, &UnwrapConfig::default(), None)?;

        let uvs = mesh.uvs.as_ref().unwrap();
        assert!(uvs.iter().all(|p| {
            p[0] >= 0.0 && p[0] <= 1.0 && p[1] >= 0.0 && p[1] <= 1.0
        }));
        // the antipodal pins span the chart
        let du = uvs[0][0] - uvs[1][0];
        let dv = uvs[0][1] - uvs[1][1];
        assert!((du * du + dv * dv).sqrt() > 0.8);
        Ok(())
    }

    #[test]
    fn empty_mesh_is_rejected() {
        let mut mesh = TriangleMesh::new(Vec::new(), Vec::new());
        assert!(matches!(
            unwrap_mesh(&mut mesh, &UnwrapConfig::default(), None),
            Err(TextureError::EmptyMesh { .. })
        ));
    }

    #[test]
    fn stop_predicate_still_yields_a_valid_chart() -> Result<(), TextureError> {
        let mut mesh = grid_mesh(4, 4, 0.1, 0.1);
        unwrap_mesh(&mut mesh, &UnwrapConfig::default(), Some(&|| true))?;

        let (min, max) = uv_bounds(mesh.uvs.as_ref().unwrap());
        assert!(min[0] >= 0.0 && max[0] <= 1.0);
        assert!(min[1] >= 0.0 && max[1] <= 1.0);
        Ok(())
    }

    #[test]
    fn out_of_range_margin_is_rejected() {
        let mut mesh = grid_mesh(4, 4, 0.1, 0.1);
        let config = UnwrapConfig {
            iterations: 10,
            margin: 0.5,
        };
        assert!(matches!(
            unwrap_mesh(&mut mesh, &config, None),
            Err(TextureError::InvalidParameter { .. })
        ));
    }
}
