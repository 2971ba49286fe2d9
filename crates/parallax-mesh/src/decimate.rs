use std::collections::{BinaryHeap, HashMap, HashSet};

use glam::DVec3;

use crate::error::MeshError;
use crate::mesh::TriangleMesh;

/// Penalty weight of the virtual planes keeping boundary edges in place.
const BOUNDARY_WEIGHT: f64 = 100.0;

/// Symmetric 4x4 error quadric, upper triangle in row-major order.
type Quadric = [f64; 10];

fn quadric_from_plane(n: DVec3, d: f64, w: f64) -> Quadric {
    [
        w * n.x * n.x,
        w * n.x * n.y,
        w * n.x * n.z,
        w * n.x * d,
        w * n.y * n.y,
        w * n.y * n.z,
        w * n.y * d,
        w * n.z * n.z,
        w * n.z * d,
        w * d * d,
    ]
}

fn quadric_add(a: &mut Quadric, b: &Quadric) {
    for i in 0..10 {
        a[i] += b[i];
    }
}

fn quadric_cost(q: &Quadric, p: DVec3) -> f64 {
    q[0] * p.x * p.x
        + 2.0 * q[1] * p.x * p.y
        + 2.0 * q[2] * p.x * p.z
        + 2.0 * q[3] * p.x
        + q[4] * p.y * p.y
        + 2.0 * q[5] * p.y * p.z
        + 2.0 * q[6] * p.y
        + q[7] * p.z * p.z
        + 2.0 * q[8] * p.z
        + q[9]
}

/// Minimizer of the quadric, `None` when the normal equations are singular.
fn quadric_minimum(q: &Quadric) -> Option<DVec3> {
    let a = [[q[0], q[1], q[2]], [q[1], q[4], q[5]], [q[2], q[5], q[7]]];
    let b = [-q[3], -q[6], -q[8]];

    let det = a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
        - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
        + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0]);
    let scale = a
        .iter()
        .flatten()
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if det.abs() <= 1e-9 * scale * scale * scale {
        return None;
    }

    let inv_det = 1.0 / det;
    let x = (b[0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
        - a[0][1] * (b[1] * a[2][2] - a[1][2] * b[2])
        + a[0][2] * (b[1] * a[2][1] - a[1][1] * b[2]))
        * inv_det;
    let y = (a[0][0] * (b[1] * a[2][2] - a[1][2] * b[2])
        - b[0] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
        + a[0][2] * (a[1][0] * b[2] - b[1] * a[2][0]))
        * inv_det;
    let z = (a[0][0] * (a[1][1] * b[2] - b[1] * a[2][1])
        - a[0][1] * (a[1][0] * b[2] - b[1] * a[2][0])
        + b[0] * (a[1][0] * a[2][1] - a[1][1] * a[2][0]))
        * inv_det;
    Some(DVec3::new(x, y, z))
}

/// A candidate edge collapse ordered by ascending cost.
struct EdgeCandidate {
    cost: f64,
    a: u32,
    b: u32,
    version_a: u32,
    version_b: u32,
    position: DVec3,
}

impl PartialEq for EdgeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.a == other.a && self.b == other.b
    }
}

impl Eq for EdgeCandidate {}

impl PartialOrd for EdgeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // reversed so the BinaryHeap pops the cheapest collapse first
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (other.a, other.b).cmp(&(self.a, self.b)))
    }
}

struct DecimateState {
    positions: Vec<DVec3>,
    quadrics: Vec<Quadric>,
    versions: Vec<u32>,
    vertex_alive: Vec<bool>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<u32>>,
}

impl DecimateState {
    /// Vertices sharing an alive face with `v`.
    fn neighbors(&self, v: u32) -> HashSet<u32> {
        let mut out = HashSet::new();
        for &f in &self.vertex_faces[v as usize] {
            if !self.face_alive[f as usize] {
                continue;
            }
            for &u in &self.faces[f as usize] {
                if u != v {
                    out.insert(u);
                }
            }
        }
        out
    }

    fn candidate(&self, a: u32, b: u32) -> EdgeCandidate {
        let mut q = self.quadrics[a as usize];
        quadric_add(&mut q, &self.quadrics[b as usize]);

        let pa = self.positions[a as usize];
        let pb = self.positions[b as usize];
        let position = match quadric_minimum(&q) {
            Some(p) => p,
            None => {
                // fall back to the cheapest of midpoint and endpoints
                let mid = (pa + pb) * 0.5;
                [mid, pa, pb]
                    .into_iter()
                    .min_by(|x, y| {
                        quadric_cost(&q, *x)
                            .partial_cmp(&quadric_cost(&q, *y))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap_or(mid)
            }
        };

        EdgeCandidate {
            cost: quadric_cost(&q, position),
            a,
            b,
            version_a: self.versions[a as usize],
            version_b: self.versions[b as usize],
            position,
        }
    }
}

/// Decimate a mesh to roughly `target_triangles` by quadric edge collapse.
///
/// Collapses are ordered by their quadric error in a priority queue; stale
/// queue entries are dropped through per-vertex versions. A collapse is
/// rejected when it would pinch the surface (the endpoints share more
/// neighbors than faces). Boundary edges are held in place by penalty
/// planes. Collapsing stops once the triangle count drops to the target,
/// when no legal collapse remains, or when `stop` returns true, so the
/// result can stay above the target on constrained topology.
///
/// Per-vertex attributes are dropped, the result carries positions and
/// triangles only.
pub fn decimate(
    mesh: &TriangleMesh,
    target_triangles: usize,
    stop: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<TriangleMesh, MeshError> {
    if target_triangles < 4 {
        return Err(MeshError::InvalidParameter {
            name: "target_triangles",
            value: target_triangles as f64,
        });
    }
    mesh.validate_indices()?;
    if mesh.triangle_count() <= target_triangles {
        return Ok(TriangleMesh::new(mesh.vertices.clone(), mesh.triangles.clone()));
    }

    let n = mesh.vertex_count();
    let mut state = DecimateState {
        positions: mesh.vertices.iter().map(|v| DVec3::from(*v)).collect(),
        quadrics: vec![[0.0; 10]; n],
        versions: vec![0; n],
        vertex_alive: vec![true; n],
        faces: mesh.triangles.clone(),
        face_alive: vec![true; mesh.triangle_count()],
        vertex_faces: vec![Vec::new(); n],
    };

    // face plane quadrics, weighted by area
    for (f, tri) in state.faces.iter().enumerate() {
        let pa = state.positions[tri[0] as usize];
        let pb = state.positions[tri[1] as usize];
        let pc = state.positions[tri[2] as usize];
        let cross = (pb - pa).cross(pc - pa);
        let double_area = cross.length();
        for &v in tri {
            state.vertex_faces[v as usize].push(f as u32);
        }
        if double_area < 1e-15 {
            continue;
        }
        let normal = cross / double_area;
        let q = quadric_from_plane(normal, -normal.dot(pa), 0.5 * double_area);
        for &v in tri {
            quadric_add(&mut state.quadrics[v as usize], &q);
        }
    }

    // boundary edges get a perpendicular penalty plane
    let mut edge_faces: HashMap<(u32, u32), Vec<u32>> = HashMap::new();
    for (f, tri) in state.faces.iter().enumerate() {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            edge_faces
                .entry((a.min(b), a.max(b)))
                .or_default()
                .push(f as u32);
        }
    }
    for (&(a, b), faces) in &edge_faces {
        if faces.len() != 1 {
            continue;
        }
        let pa = state.positions[a as usize];
        let pb = state.positions[b as usize];
        let edge = pb - pa;
        let face_n = {
            let tri = state.faces[faces[0] as usize];
            let p0 = state.positions[tri[0] as usize];
            let p1 = state.positions[tri[1] as usize];
            let p2 = state.positions[tri[2] as usize];
            (p1 - p0).cross(p2 - p0)
        };
        let constraint = edge.cross(face_n).normalize_or_zero();
        if constraint == DVec3::ZERO {
            continue;
        }
        let q = quadric_from_plane(
            constraint,
            -constraint.dot(pa),
            BOUNDARY_WEIGHT * edge.length_squared(),
        );
        quadric_add(&mut state.quadrics[a as usize], &q);
        quadric_add(&mut state.quadrics[b as usize], &q);
    }

    let mut heap: BinaryHeap<EdgeCandidate> = edge_faces
        .keys()
        .map(|&(a, b)| state.candidate(a, b))
        .collect();
    drop(edge_faces);

    let mut remaining = state.faces.len();
    while remaining > target_triangles {
        if let Some(stop) = stop {
            if stop() {
                break;
            }
        }
        let Some(cand) = heap.pop() else {
            break;
        };
        let (a, b) = (cand.a, cand.b);
        if !state.vertex_alive[a as usize]
            || !state.vertex_alive[b as usize]
            || cand.version_a != state.versions[a as usize]
            || cand.version_b != state.versions[b as usize]
        {
            continue;
        }

        // a collapse is legal only when the shared neighborhood is exactly
        // the opposite vertices of the shared faces
        let shared_faces: Vec<u32> = state.vertex_faces[a as usize]
            .iter()
            .copied()
            .filter(|&f| {
                state.face_alive[f as usize] && state.faces[f as usize].contains(&b)
            })
            .collect();
        if shared_faces.is_empty() {
            continue;
        }
        let common = state
            .neighbors(a)
            .intersection(&state.neighbors(b))
            .count();
        if common != shared_faces.len() {
            continue;
        }

        // merge b into a
        state.positions[a as usize] = cand.position;
        let qb = state.quadrics[b as usize];
        quadric_add(&mut state.quadrics[a as usize], &qb);
        for &f in &shared_faces {
            state.face_alive[f as usize] = false;
            remaining -= 1;
        }
        let b_faces = std::mem::take(&mut state.vertex_faces[b as usize]);
        for f in b_faces {
            if !state.face_alive[f as usize] {
                continue;
            }
            for v in state.faces[f as usize].iter_mut() {
                if *v == b {
                    *v = a;
                }
            }
            state.vertex_faces[a as usize].push(f);
        }
        state.vertex_alive[b as usize] = false;
        state.versions[a as usize] += 1;
        state.versions[b as usize] += 1;

        for nb in state.neighbors(a) {
            heap.push(state.candidate(a, nb));
        }
    }
    log::debug!(
        "decimation: {} -> {} triangles (target {})",
        state.faces.len(),
        remaining,
        target_triangles
    );

    // compact the surviving geometry
    let mut remap = vec![u32::MAX; n];
    let mut vertices = Vec::new();
    let mut triangles = Vec::with_capacity(remaining);
    for (f, tri) in state.faces.iter().enumerate() {
        if !state.face_alive[f] {
            continue;
        }
        let mut out = [0u32; 3];
        for (slot, &v) in out.iter_mut().zip(tri.iter()) {
            if remap[v as usize] == u32::MAX {
                remap[v as usize] = vertices.len() as u32;
                vertices.push(state.positions[v as usize].into());
            }
            *slot = remap[v as usize];
        }
        triangles.push(out);
    }

    Ok(TriangleMesh::new(vertices, triangles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marching::marching_cubes;
    use crate::poisson::ImplicitField;

    fn sphere_mesh() -> TriangleMesh {
        let field = ImplicitField::from_fn([-1.0, -1.0, -1.0], 2.0, 24, 0.0, |p| {
            (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt() - 0.7
        });
        marching_cubes(&field, 0.0, 24).unwrap()
    }

    #[test]
    fn hits_the_target_window() -> Result<(), MeshError> {
        let mesh = sphere_mesh();
        let target = mesh.triangle_count() / 2;
        let out = decimate(&mesh, target, None)?;

        let lo = (0.9 * target as f64) as usize;
        let hi = (1.1 * target as f64) as usize;
        assert!(
            out.triangle_count() >= lo && out.triangle_count() <= hi,
            "{} not within [{lo}, {hi}]",
            out.triangle_count()
        );
        Ok(())
    }

    #[test]
    fn decimated_sphere_stays_manifold() -> Result<(), MeshError> {
        let mesh = sphere_mesh();
        let out = decimate(&mesh, mesh.triangle_count() / 2, None)?;
        out.validate_indices()?;

        let mut edge_uses: HashMap<(u32, u32), usize> = HashMap::new();
        for tri in &out.triangles {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                *edge_uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        assert!(edge_uses.values().all(|&uses| uses == 2));
        Ok(())
    }

    #[test]
    fn decimated_sphere_keeps_its_shape() -> Result<(), MeshError> {
        let mesh = sphere_mesh();
        let out = decimate(&mesh, mesh.triangle_count() / 2, None)?;
        for v in &out.vertices {
            let r = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert!((r - 0.7).abs() < 0.1, "vertex drifted to radius {r}");
        }
        Ok(())
    }

    #[test]
    fn small_mesh_is_returned_unchanged() -> Result<(), MeshError> {
        let mesh = TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let out = decimate(&mesh, 10, None)?;
        assert_eq!(out.triangle_count(), 2);
        assert_eq!(out.vertices, mesh.vertices);
        Ok(())
    }

    #[test]
    fn stop_predicate_prevents_collapses() -> Result<(), MeshError> {
        let mesh = sphere_mesh();
        let out = decimate(&mesh, mesh.triangle_count() / 2, Some(&|| true))?;
        assert_eq!(out.triangle_count(), mesh.triangle_count());
        Ok(())
    }

    #[test]
    fn tiny_target_is_rejected() {
        let mesh = sphere_mesh();
        assert!(matches!(
            decimate(&mesh, 0, None),
            Err(MeshError::InvalidParameter { .. })
        ));
    }
}
