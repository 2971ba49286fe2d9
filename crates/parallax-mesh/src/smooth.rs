use std::collections::HashMap;

use glam::DVec3;
use rayon::prelude::*;

use crate::mesh::TriangleMesh;

/// Configuration for Laplacian smoothing.
#[derive(Debug, Clone)]
pub struct SmoothConfig {
    /// Number of smoothing iterations.
    pub iterations: usize,
    /// Step size toward the neighborhood average, in `(0, 1]`.
    pub lambda: f64,
}

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            lambda: 0.5,
        }
    }
}

/// Smooth vertex positions with uniform Laplacian steps.
///
/// Every iteration moves each vertex toward the average of its one-ring by
/// `lambda`, computed from a snapshot of the previous positions so the
/// result does not depend on vertex order. Boundary vertices are pinned.
/// Vertex normals are recomputed when present, texture coordinates are left
/// untouched.
pub fn laplacian_smooth(mesh: &mut TriangleMesh, config: &SmoothConfig) {
    if config.iterations == 0 || mesh.vertices.is_empty() {
        return;
    }

    let n = mesh.vertices.len();
    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); n];
    let mut edge_uses: HashMap<(u32, u32), usize> = HashMap::new();
    for tri in &mesh.triangles {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            neighbors[a as usize].push(b);
            neighbors[b as usize].push(a);
            *edge_uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }

    // vertices on an open edge stay where they are
    let mut pinned = vec![false; n];
    for (&(a, b), &uses) in &edge_uses {
        if uses == 1 {
            pinned[a as usize] = true;
            pinned[b as usize] = true;
        }
    }

    let mut positions: Vec<DVec3> = mesh.vertices.iter().map(|v| DVec3::from(*v)).collect();
    for _ in 0..config.iterations {
        let snapshot = positions.clone();
        positions
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, p)| {
                if pinned[i] || neighbors[i].is_empty() {
                    return;
                }
                let mut avg = DVec3::ZERO;
                for &nb in &neighbors[i] {
                    avg += snapshot[nb as usize];
                }
                avg /= neighbors[i].len() as f64;
                *p = snapshot[i] + config.lambda * (avg - snapshot[i]);
            });
    }

    for (v, p) in mesh.vertices.iter_mut().zip(positions.iter()) {
        *v = (*p).into();
    }
    if mesh.normals.is_some() {
        mesh.compute_vertex_normals();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A flat n x n grid with one raised center vertex.
    fn bumpy_grid(n: usize) -> TriangleMesh {
        let mut vertices = Vec::new();
        for j in 0..n {
            for i in 0..n {
                vertices.push([i as f64, j as f64, 0.0]);
            }
        }
        let center = (n / 2) * n + n / 2;
        vertices[center][2] = 1.0;

        let mut triangles = Vec::new();
        for j in 0..n - 1 {
            for i in 0..n - 1 {
                let v0 = (j * n + i) as u32;
                let v1 = v0 + 1;
                let v2 = v0 + n as u32;
                let v3 = v2 + 1;
                triangles.push([v0, v1, v3]);
                triangles.push([v0, v3, v2]);
            }
        }
        TriangleMesh::new(vertices, triangles)
    }

    #[test]
    fn bump_is_flattened() {
        let mut mesh = bumpy_grid(5);
        let center = 2 * 5 + 2;
        laplacian_smooth(&mut mesh, &SmoothConfig::default());
        assert!(mesh.vertices[center][2] < 0.55);
        assert!(mesh.vertices[center][2] > 0.0);
    }

    #[test]
    fn boundary_vertices_are_pinned() {
        let mut mesh = bumpy_grid(5);
        let before = mesh.vertices.clone();
        laplacian_smooth(&mut mesh, &SmoothConfig::default());
        for j in 0..5usize {
            for i in 0..5usize {
                if i == 0 || j == 0 || i == 4 || j == 4 {
                    assert_eq!(mesh.vertices[j * 5 + i], before[j * 5 + i]);
                }
            }
        }
    }

    #[test]
    fn closed_mesh_shrinks_toward_the_centroid() {
        // octahedron centered at the origin
        let mut mesh = TriangleMesh::new(
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
        );
        laplacian_smooth(&mut mesh, &SmoothConfig::default());
        for v in &mesh.vertices {
            let r = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert!(r < 1.0);
        }
    }

    #[test]
    fn zero_iterations_is_a_no_op() {
        let mut mesh = bumpy_grid(5);
        let before = mesh.vertices.clone();
        laplacian_smooth(
            &mut mesh,
            &SmoothConfig {
                iterations: 0,
                lambda: 0.5,
            },
        );
        assert_eq!(mesh.vertices, before);
    }
}
