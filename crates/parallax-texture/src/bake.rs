use glam::DVec3;
use rayon::prelude::*;

use parallax_image::camera::PinholeCamera;
use parallax_image::image::{Image, ImageSize};
use parallax_mesh::TriangleMesh;

use crate::error::TextureError;

/// Color assigned to atlas texels no triangle covers.
const BACKGROUND: u8 = 128;

/// A posed source photograph used for baking.
pub struct TextureView<'a> {
    /// Calibrated camera the image was taken with.
    pub camera: &'a PinholeCamera,
    /// The photograph itself.
    pub image: &'a Image<u8, 3>,
}

/// Parameters of the texture bake.
#[derive(Clone, Debug)]
pub struct BakeConfig {
    /// Side length of the square RGB atlas in pixels.
    pub atlas_size: usize,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self { atlas_size: 4096 }
    }
}

/// For each triangle, the view with the most frontal look at it among the
/// views that see all three vertices. `None` when no view qualifies.
fn select_views(mesh: &TriangleMesh, views: &[TextureView]) -> Vec<Option<u32>> {
    (0..mesh.triangle_count())
        .into_par_iter()
        .map(|t| {
            let tri = mesh.triangles[t];
            let normal = DVec3::from(mesh.face_normal(t));
            let centroid = DVec3::from(mesh.face_centroid(t));

            let mut best: Option<(f64, u32)> = None;
            for (v, view) in views.iter().enumerate() {
                let visible = tri
                    .iter()
                    .all(|&idx| view.camera.sees(&mesh.vertices[idx as usize]));
                if !visible {
                    continue;
                }
                let center = DVec3::from(view.camera.extrinsics.camera_center());
                let toward = (center - centroid).normalize_or_zero();
                let alignment = toward.dot(normal);
                if alignment <= 0.0 {
                    continue;
                }
                if best.map_or(true, |(a, _)| alignment > a) {
                    best = Some((alignment, v as u32));
                }
            }
            best.map(|(_, v)| v)
        })
        .collect()
}

fn sample_bilinear(image: &Image<u8, 3>, x: f64, y: f64) -> [u8; 3] {
    let w = image.width();
    let h = image.height();
    let data = image.as_slice();

    let xf = x.clamp(0.0, (w - 1) as f64);
    let yf = y.clamp(0.0, (h - 1) as f64);
    let x0 = xf.floor() as usize;
    let y0 = yf.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = xf - x0 as f64;
    let fy = yf - y0 as f64;

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let p00 = data[(y0 * w + x0) * 3 + c] as f64;
        let p10 = data[(y0 * w + x1) * 3 + c] as f64;
        let p01 = data[(y1 * w + x0) * 3 + c] as f64;
        let p11 = data[(y1 * w + x1) * 3 + c] as f64;
        let top = p00 + (p10 - p00) * fx;
        let bottom = p01 + (p11 - p01) * fx;
        *slot = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Per-triangle data prepared for rasterization.
struct RasterTriangle {
    /// UV corners in atlas pixel coordinates.
    uv: [[f64; 2]; 3],
    /// Corner projections into the chosen source image.
    pixels: [[f64; 2]; 3],
    /// Index of the chosen source view.
    view: u32,
    /// Inclusive atlas row range covered by the triangle.
    rows: (usize, usize),
}

/// Rasterize the mesh into a square RGB texture atlas.
///
/// Each triangle samples the posed view that faces it most directly and
/// sees all three of its vertices. The triangle is filled in UV space by
/// barycentric interpolation of the corner projections; texels outside
/// every triangle keep a neutral gray. Rows of the atlas are rasterized
/// in parallel.
pub fn bake_texture(
    mesh: &TriangleMesh,
    views: &[TextureView],
    config: &BakeConfig,
) -> Result<Image<u8, 3>, TextureError> {
    if config.atlas_size < 2 {
        return Err(TextureError::InvalidParameter {
            name: "atlas_size",
            value: config.atlas_size as f64,
        });
    }
    if mesh.is_empty() {
        return Err(TextureError::EmptyMesh {
            vertices: mesh.vertex_count(),
            triangles: mesh.triangle_count(),
        });
    }
    let uvs = mesh.uvs.as_ref().ok_or(TextureError::MissingUvs)?;
    if views.is_empty() {
        return Err(TextureError::NoViews);
    }

    let size = config.atlas_size;
    let chosen = select_views(mesh, views);
    let covered = chosen.iter().filter(|v| v.is_some()).count();
    log::debug!(
        "bake: {covered}/{} triangles covered by {} views",
        mesh.triangle_count(),
        views.len()
    );

    // project each covered triangle once and bucket it by atlas row
    let mut raster: Vec<RasterTriangle> = Vec::new();
    for (t, view) in chosen.iter().enumerate() {
        let Some(view_idx) = view else {
            continue;
        };
        let tri = mesh.triangles[t];
        let camera = views[*view_idx as usize].camera;

        let mut uv_px = [[0.0f64; 2]; 3];
        let mut pixels = [[0.0f64; 2]; 3];
        let mut ok = true;
        for c in 0..3 {
            let idx = tri[c] as usize;
            uv_px[c] = [uvs[idx][0] * size as f64, uvs[idx][1] * size as f64];
            match camera.project(&mesh.vertices[idx]) {
                Some(p) => pixels[c] = p,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            continue;
        }

        let min_y = uv_px.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min);
        let max_y = uv_px
            .iter()
            .map(|p| p[1])
            .fold(f64::NEG_INFINITY, f64::max);
        let row_lo = (min_y.floor().max(0.0)) as usize;
        let row_hi = (max_y.ceil() as usize).min(size - 1);
        if row_lo > row_hi {
            continue;
        }
        raster.push(RasterTriangle {
            uv: uv_px,
            pixels,
            view: *view_idx,
            rows: (row_lo, row_hi),
        });
    }

    let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); size];
    for (i, tri) in raster.iter().enumerate() {
        for row in tri.rows.0..=tri.rows.1 {
            buckets[row].push(i as u32);
        }
    }

    let mut data = vec![BACKGROUND; size * size * 3];
    data.par_chunks_exact_mut(size * 3)
        .enumerate()
        .for_each(|(y, row)| {
            let py = y as f64 + 0.5;
            for &ti in &buckets[y] {
                let tri = &raster[ti as usize];
                let [a, b, c] = tri.uv;
                let denom = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
                if denom.abs() < 1e-12 {
                    continue;
                }
                let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as usize;
                let max_x = (a[0].max(b[0]).max(c[0]).ceil() as usize).min(size - 1);
                for x in min_x..=max_x {
                    let px = x as f64 + 0.5;
                    let w0 = ((b[0] - px) * (c[1] - py) - (b[1] - py) * (c[0] - px)) / denom;
                    let w1 = ((c[0] - px) * (a[1] - py) - (c[1] - py) * (a[0] - px)) / denom;
                    let w2 = 1.0 - w0 - w1;
                    if w0 < -1e-7 || w1 < -1e-7 || w2 < -1e-7 {
                        continue;
                    }
                    let sx = w0 * tri.pixels[0][0] + w1 * tri.pixels[1][0] + w2 * tri.pixels[2][0];
                    let sy = w0 * tri.pixels[0][1] + w1 * tri.pixels[1][1] + w2 * tri.pixels[2][1];
                    let rgb =
                        sample_bilinear(views[tri.view as usize].image, sx, sy);
                    row[x * 3..x * 3 + 3].copy_from_slice(&rgb);
                }
            }
        });

    let atlas = Image::new(
        ImageSize {
            width: size,
            height: size,
        },
        data,
    )?;
    Ok(atlas)
}
