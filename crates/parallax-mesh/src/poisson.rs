use parallax_3d::PointCloud;
use rayon::prelude::*;

use crate::error::MeshError;
use crate::octree::Octree;

/// Smallest and largest grid resolutions used by the solver.
const MIN_RESOLUTION: usize = 8;
const MAX_RESOLUTION: usize = 128;

/// Configuration for the indicator solver.
#[derive(Debug, Clone)]
pub struct PoissonConfig {
    /// Number of Gauss-Seidel sweeps.
    pub sweeps: usize,
    /// Screening weight pulling the indicator toward zero away from data.
    pub screening: f64,
}

impl Default for PoissonConfig {
    fn default() -> Self {
        Self {
            sweeps: 10,
            screening: 0.01,
        }
    }
}

/// A scalar field sampled on a cell-centered uniform grid.
///
/// The surface is the level set at [`ImplicitField::iso`]; values below the
/// level are inside the object.
#[derive(Debug, Clone)]
pub struct ImplicitField {
    values: Vec<f64>,
    resolution: usize,
    min: [f64; 3],
    cell: f64,
    iso: f64,
}

impl ImplicitField {
    /// Build a field by sampling a function at the cell centers.
    ///
    /// Useful for analytic distance fields; `f` receives world positions.
    pub fn from_fn(
        min: [f64; 3],
        size: f64,
        resolution: usize,
        iso: f64,
        f: impl Fn([f64; 3]) -> f64,
    ) -> Self {
        let cell = size / resolution as f64;
        let values = (0..resolution * resolution * resolution)
            .map(|idx| {
                let i = idx % resolution;
                let j = idx / resolution % resolution;
                let k = idx / (resolution * resolution);
                f([
                    min[0] + (i as f64 + 0.5) * cell,
                    min[1] + (j as f64 + 0.5) * cell,
                    min[2] + (k as f64 + 0.5) * cell,
                ])
            })
            .collect();
        Self {
            values,
            resolution,
            min,
            cell,
            iso,
        }
    }

    /// Cells per axis.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Minimum corner and edge length of the sampled cube.
    pub fn bounds(&self) -> ([f64; 3], f64) {
        (self.min, self.cell * self.resolution as f64)
    }

    /// Level at which to extract the surface.
    pub fn iso(&self) -> f64 {
        self.iso
    }

    #[inline]
    fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.resolution + j) * self.resolution + i
    }

    /// Value of a cell by grid index.
    pub fn value(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[self.idx(i, j, k)]
    }

    /// Trilinear interpolation at a world position, clamped to the border
    /// cells outside the cube.
    pub fn sample(&self, p: &[f64; 3]) -> f64 {
        let r = self.resolution;
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for a in 0..3 {
            // cell-centered grid: cell i is centered at min + (i + 0.5) * cell
            let g = (p[a] - self.min[a]) / self.cell - 0.5;
            let clamped = g.clamp(0.0, (r - 1) as f64);
            let i0 = clamped.floor().min((r - 2) as f64).max(0.0);
            base[a] = i0 as usize;
            frac[a] = (clamped - i0).clamp(0.0, 1.0);
        }

        let mut acc = 0.0;
        for corner in 0..8 {
            let mut w = 1.0;
            let mut ijk = [0usize; 3];
            for a in 0..3 {
                if corner >> a & 1 == 1 {
                    ijk[a] = base[a] + 1;
                    w *= frac[a];
                } else {
                    ijk[a] = base[a];
                    w *= 1.0 - frac[a];
                }
            }
            acc += w * self.value(ijk[0], ijk[1], ijk[2]);
        }
        acc
    }
}

/// Solve for an indicator-like scalar field over an oriented point cloud.
///
/// The oriented normals are splatted into a grid vector field whose
/// divergence forms the right-hand side of a screened Poisson equation,
/// relaxed by Gauss-Seidel sweeps with zero Dirichlet boundaries. The grid
/// resolution follows the octree subdivision (`2^depth`, clamped). The iso
/// level is set to the mean field value at the input points.
///
/// The residual is logged per sweep; `stop` is polled between sweeps and
/// ends the relaxation early with the current state.
pub fn solve_indicator(
    cloud: &PointCloud,
    octree: &Octree,
    config: &PoissonConfig,
    stop: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<ImplicitField, MeshError> {
    let points = cloud.points();
    let normals = cloud.normals().ok_or(MeshError::MissingNormals)?;
    if points.is_empty() {
        return Err(MeshError::TooFewPoints {
            points: 0,
            required: 1,
        });
    }

    let (min, size) = octree.bounds();
    let resolution = octree.grid_resolution().clamp(MIN_RESOLUTION, MAX_RESOLUTION);
    let cell = size / resolution as f64;
    let n_cells = resolution * resolution * resolution;

    // splat the oriented normals into a vector field
    let mut vector = vec![[0.0f64; 3]; n_cells];
    let field_idx = |i: usize, j: usize, k: usize| (k * resolution + j) * resolution + i;
    for (p, n) in points.iter().zip(normals.iter()) {
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for a in 0..3 {
            let g = ((p[a] - min[a]) / cell - 0.5).clamp(0.0, (resolution - 1) as f64);
            let i0 = g.floor().min((resolution - 2) as f64);
            base[a] = i0 as usize;
            frac[a] = g - i0;
        }
        for corner in 0..8 {
            let mut w = 1.0;
            let mut ijk = [0usize; 3];
            for a in 0..3 {
                if corner >> a & 1 == 1 {
                    ijk[a] = base[a] + 1;
                    w *= frac[a];
                } else {
                    ijk[a] = base[a];
                    w *= 1.0 - frac[a];
                }
            }
            let cell_v = &mut vector[field_idx(ijk[0], ijk[1], ijk[2])];
            cell_v[0] += w * n[0];
            cell_v[1] += w * n[1];
            cell_v[2] += w * n[2];
        }
    }

    // divergence of the splatted field, zero outside the cube
    let at = |v: &[[f64; 3]], i: isize, j: isize, k: isize, axis: usize| -> f64 {
        let r = resolution as isize;
        if i < 0 || j < 0 || k < 0 || i >= r || j >= r || k >= r {
            return 0.0;
        }
        v[field_idx(i as usize, j as usize, k as usize)][axis]
    };
    let mut rhs = vec![0.0f64; n_cells];
    for k in 0..resolution {
        for j in 0..resolution {
            for i in 0..resolution {
                let (ii, jj, kk) = (i as isize, j as isize, k as isize);
                rhs[field_idx(i, j, k)] = (at(&vector, ii + 1, jj, kk, 0)
                    - at(&vector, ii - 1, jj, kk, 0)
                    + at(&vector, ii, jj + 1, kk, 1)
                    - at(&vector, ii, jj - 1, kk, 1)
                    + at(&vector, ii, jj, kk + 1, 2)
                    - at(&vector, ii, jj, kk - 1, 2))
                    / (2.0 * cell);
            }
        }
    }
    drop(vector);

    // gauss-seidel relaxation, zero Dirichlet outside the cube
    let mut chi = vec![0.0f64; n_cells];
    let h2 = cell * cell;
    let denom = 6.0 + config.screening * h2;
    for sweep in 0..config.sweeps {
        if let Some(stop) = stop {
            if stop() {
                log::debug!("indicator relaxation stopped at sweep {sweep}");
                break;
            }
        }
        for k in 0..resolution {
            for j in 0..resolution {
                for i in 0..resolution {
                    let mut sum = 0.0;
                    if i > 0 {
                        sum += chi[field_idx(i - 1, j, k)];
                    }
                    if i + 1 < resolution {
                        sum += chi[field_idx(i + 1, j, k)];
                    }
                    if j > 0 {
                        sum += chi[field_idx(i, j - 1, k)];
                    }
                    if j + 1 < resolution {
                        sum += chi[field_idx(i, j + 1, k)];
                    }
                    if k > 0 {
                        sum += chi[field_idx(i, j, k - 1)];
                    }
                    if k + 1 < resolution {
                        sum += chi[field_idx(i, j, k + 1)];
                    }
                    let idx = field_idx(i, j, k);
                    chi[idx] = (sum - h2 * rhs[idx]) / denom;
                }
            }
        }

        let residual = (0..n_cells)
            .into_par_iter()
            .map(|idx| {
                let i = idx % resolution;
                let j = idx / resolution % resolution;
                let k = idx / (resolution * resolution);
                let mut sum = 0.0;
                if i > 0 {
                    sum += chi[idx - 1];
                }
                if i + 1 < resolution {
                    sum += chi[idx + 1];
                }
                if j > 0 {
                    sum += chi[idx - resolution];
                }
                if j + 1 < resolution {
                    sum += chi[idx + resolution];
                }
                if k > 0 {
                    sum += chi[idx - resolution * resolution];
                }
                if k + 1 < resolution {
                    sum += chi[idx + resolution * resolution];
                }
                let r = sum - denom * chi[idx] - h2 * rhs[idx];
                r * r
            })
            .sum::<f64>();
        log::debug!(
            "poisson sweep {}: residual rms {:.6e}",
            sweep + 1,
            (residual / n_cells as f64).sqrt()
        );
    }

    let mut field = ImplicitField {
        values: chi,
        resolution,
        min,
        cell,
        iso: 0.0,
    };

    // the surface passes through the samples
    let iso_sum: f64 = points.par_iter().map(|p| field.sample(p)).sum();
    field.iso = iso_sum / points.len() as f64;
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::OctreeConfig;

    fn sphere_cloud(radius: f64, n: usize) -> PointCloud {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 0..n {
            for j in 1..n {
                let theta = std::f64::consts::PI * j as f64 / n as f64;
                let phi = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
                let dir = [
                    theta.sin() * phi.cos(),
                    theta.sin() * phi.sin(),
                    theta.cos(),
                ];
                points.push([dir[0] * radius, dir[1] * radius, dir[2] * radius]);
                normals.push(dir);
            }
        }
        PointCloud::new(points, None, Some(normals))
    }

    // generous padding keeps the outer side of the surface inside the cube
    fn test_octree_config() -> OctreeConfig {
        OctreeConfig {
            max_depth: 5,
            leaf_capacity: 1,
            padding: 0.5,
        }
    }

    #[test]
    fn inside_is_below_outside() -> Result<(), MeshError> {
        let cloud = sphere_cloud(0.8, 24);
        let octree = Octree::build(cloud.points(), &test_octree_config())?;
        let field = solve_indicator(&cloud, &octree, &PoissonConfig::default(), None)?;

        let inside = field.sample(&[0.55, 0.0, 0.0]);
        let outside = field.sample(&[1.05, 0.0, 0.0]);
        assert!(
            inside < outside,
            "inside {inside} should be below outside {outside}"
        );
        Ok(())
    }

    #[test]
    fn iso_level_sits_between_inside_and_outside() -> Result<(), MeshError> {
        let cloud = sphere_cloud(0.8, 24);
        let octree = Octree::build(cloud.points(), &test_octree_config())?;
        let field = solve_indicator(&cloud, &octree, &PoissonConfig::default(), None)?;

        // probe one grid cell inside and outside the sphere shell
        let (_, size) = field.bounds();
        let h = size / field.resolution() as f64;
        let near_inside = field.sample(&[0.8 - 1.5 * h, 0.0, 0.0]);
        let near_outside = field.sample(&[0.8 + 1.5 * h, 0.0, 0.0]);
        assert!(near_inside < field.iso());
        assert!(near_outside > field.iso());
        Ok(())
    }

    #[test]
    fn missing_normals_are_rejected() {
        let cloud = PointCloud::new(vec![[0.0; 3], [1.0; 3], [0.5; 3]], None, None);
        let octree = Octree::build(cloud.points(), &OctreeConfig::default()).unwrap();
        let result = solve_indicator(&cloud, &octree, &PoissonConfig::default(), None);
        assert!(matches!(result, Err(MeshError::MissingNormals)));
    }

    #[test]
    fn stop_predicate_skips_relaxation() -> Result<(), MeshError> {
        let cloud = sphere_cloud(0.8, 12);
        let octree = Octree::build(cloud.points(), &OctreeConfig::default())?;
        let field = solve_indicator(&cloud, &octree, &PoissonConfig::default(), Some(&|| true))?;

        // with no sweeps every cell stays at zero
        let r = field.resolution();
        assert!((0..r).all(|i| field.value(i, r / 2, r / 2).abs() < 1e-15));
        Ok(())
    }

    #[test]
    fn sample_clamps_outside_the_cube() -> Result<(), MeshError> {
        let cloud = sphere_cloud(0.5, 12);
        let octree = Octree::build(cloud.points(), &OctreeConfig::default())?;
        let field = solve_indicator(&cloud, &octree, &PoissonConfig::default(), None)?;
        let far = field.sample(&[100.0, 100.0, 100.0]);
        assert!(far.is_finite());
        Ok(())
    }
}
