use glam::DVec3;

use crate::error::MeshError;

/// An indexed triangle mesh with optional per-vertex attributes.
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    /// Vertex positions.
    pub vertices: Vec<[f64; 3]>,
    /// Triangles as counter-clockwise vertex index triples.
    pub triangles: Vec<[u32; 3]>,
    /// Per-vertex normals, if computed.
    pub normals: Option<Vec<[f64; 3]>>,
    /// Per-vertex texture coordinates in `[0, 1]`, if unwrapped.
    pub uvs: Option<Vec<[f64; 2]>>,
}

impl TriangleMesh {
    /// Create a mesh from vertices and triangle indices.
    pub fn new(vertices: Vec<[f64; 3]>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            triangles,
            normals: None,
            uvs: None,
        }
    }

    /// Number of vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the mesh has no triangles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Check that every triangle references an existing vertex.
    pub fn validate_indices(&self) -> Result<(), MeshError> {
        let n = self.vertices.len() as u32;
        for tri in &self.triangles {
            if tri[0] >= n || tri[1] >= n || tri[2] >= n {
                return Err(MeshError::InvalidMesh("triangle index out of bounds"));
            }
        }
        Ok(())
    }

    /// Axis-aligned bounding box, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<([f64; 3], [f64; 3])> {
        let first = self.vertices.first()?;
        let mut min = *first;
        let mut max = *first;
        for v in &self.vertices {
            for i in 0..3 {
                min[i] = min[i].min(v[i]);
                max[i] = max[i].max(v[i]);
            }
        }
        Some((min, max))
    }

    /// Unnormalized normal of a triangle, its length is twice the area.
    pub fn face_normal_raw(&self, tri: usize) -> DVec3 {
        let [a, b, c] = self.triangles[tri];
        let pa = DVec3::from(self.vertices[a as usize]);
        let pb = DVec3::from(self.vertices[b as usize]);
        let pc = DVec3::from(self.vertices[c as usize]);
        (pb - pa).cross(pc - pa)
    }

    /// Unit normal of a triangle, zero for degenerate triangles.
    pub fn face_normal(&self, tri: usize) -> [f64; 3] {
        let n = self.face_normal_raw(tri);
        n.normalize_or_zero().into()
    }

    /// Centroid of a triangle.
    pub fn face_centroid(&self, tri: usize) -> [f64; 3] {
        let [a, b, c] = self.triangles[tri];
        let pa = DVec3::from(self.vertices[a as usize]);
        let pb = DVec3::from(self.vertices[b as usize]);
        let pc = DVec3::from(self.vertices[c as usize]);
        ((pa + pb + pc) / 3.0).into()
    }

    /// Total surface area.
    pub fn surface_area(&self) -> f64 {
        (0..self.triangles.len())
            .map(|t| 0.5 * self.face_normal_raw(t).length())
            .sum()
    }

    /// Compute per-vertex normals as the area-weighted average of the
    /// incident face normals.
    ///
    /// The raw cross product of a face scales with its area, accumulating
    /// it unnormalized weighs large faces more.
    pub fn compute_vertex_normals(&mut self) {
        let mut normals = vec![DVec3::ZERO; self.vertices.len()];
        for t in 0..self.triangles.len() {
            let n = self.face_normal_raw(t);
            for &idx in &self.triangles[t] {
                normals[idx as usize] += n;
            }
        }
        self.normals = Some(
            normals
                .into_iter()
                .map(|n| n.normalize_or_zero().into())
                .collect(),
        );
    }
}
