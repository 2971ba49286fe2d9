//! End-to-end reconstruction of a synthetic scene.
//!
//! Five virtual cameras orbit a unit cube wrapped in an aperiodic
//! procedural texture. The rendered frames run through the whole pipeline
//! and the resulting mesh, atlas and exports are checked against the known
//! scene geometry.

use std::error::Error;
use std::sync::{Arc, Mutex};

use parallax_image::{CameraExtrinsics, CameraIntrinsics, Image, ImageSize, PinholeCamera};
use parallax_io::asset::read_asset;
use parallax_recon::{
    reconstruct, CancelToken, Hooks, ReconError, Reconstruction, ReconstructionConfig, Stage,
};

/// Side length of the rendered frames in pixels.
const IMAGE_SIZE: usize = 192;
/// Focal length of the virtual cameras in pixels.
const FOCAL: f64 = 320.0;
/// Distance of every camera from the cube center.
const ORBIT_RADIUS: f64 = 4.0;
/// Angular spacing between consecutive cameras in degrees.
const STEP_DEG: f64 = 6.0;
/// Half the cube edge length.
const HALF_EDGE: f64 = 0.5;
/// Color of rays that miss the cube.
const BACKDROP: [u8; 3] = [40, 40, 40];

/// Ray parameter of the first cube intersection, by the slab method.
fn hit_cube(origin: &[f64; 3], dir: &[f64; 3]) -> Option<f64> {
    let mut t_near = f64::NEG_INFINITY;
    let mut t_far = f64::INFINITY;
    for i in 0..3 {
        if dir[i].abs() < 1e-12 {
            if origin[i].abs() > HALF_EDGE {
                return None;
            }
            continue;
        }
        let t0 = (-HALF_EDGE - origin[i]) / dir[i];
        let t1 = (HALF_EDGE - origin[i]) / dir[i];
        t_near = t_near.max(t0.min(t1));
        t_far = t_far.min(t0.max(t1));
    }
    (t_near <= t_far && t_far > 0.0).then_some(t_near.max(0.0))
}

fn level(v: f64) -> u8 {
    (128.0 + 110.0 * v).clamp(0.0, 255.0) as u8
}

/// Dense aperiodic 3d texture. The mixed-axis sine products give every
/// surface patch a distinctive neighborhood, so descriptors stay unique
/// and every stereo block carries texture.
fn cube_color(p: &[f64; 3]) -> [u8; 3] {
    let r = (43.0 * p[0]).sin() * (59.0 * p[1] + 1.3).sin() * (47.0 * p[2] + 0.7).sin();
    let g = (53.0 * p[1]).sin() * (61.0 * p[2] + 2.1).sin() * (44.0 * p[0] + 1.9).sin();
    let b = (67.0 * p[2]).sin() * (45.0 * p[0] + 0.4).sin() * (58.0 * p[1] + 2.6).sin();
    [level(r), level(g), level(b)]
}

/// Ray-cast the cube through the given camera.
fn render_view(camera: &PinholeCamera) -> Result<Image<u8, 3>, Box<dyn Error>> {
    let center = camera.extrinsics.camera_center();
    let r = &camera.extrinsics.rotation;
    let mut data = Vec::with_capacity(IMAGE_SIZE * IMAGE_SIZE * 3);
    for y in 0..IMAGE_SIZE {
        for x in 0..IMAGE_SIZE {
            let norm = camera.intrinsics.normalize_point(&[x as f64, y as f64]);
            // rows of the rotation are the camera axes in world space
            let dir = [
                r[0][0] * norm[0] + r[1][0] * norm[1] + r[2][0],
                r[0][1] * norm[0] + r[1][1] * norm[1] + r[2][1],
                r[0][2] * norm[0] + r[1][2] * norm[1] + r[2][2],
            ];
            let rgb = match hit_cube(&center, &dir) {
                Some(t) => cube_color(&[
                    center[0] + t * dir[0],
                    center[1] + t * dir[1],
                    center[2] + t * dir[2],
                ]),
                None => BACKDROP,
            };
            data.extend_from_slice(&rgb);
        }
    }
    let size = ImageSize {
        width: IMAGE_SIZE,
        height: IMAGE_SIZE,
    };
    Ok(Image::new(size, data)?)
}

/// Render `count` frames from an arc of cameras orbiting the cube in the
/// y = 0 plane, every one aimed at the origin. Consecutive cameras are a
/// near-horizontal baseline apart, so every pair passes the scanline gate.
fn orbit_rig(count: usize) -> Result<(Vec<Image<u8, 3>>, Vec<CameraIntrinsics>), Box<dyn Error>> {
    let intrinsics = CameraIntrinsics::new(
        (FOCAL, FOCAL),
        (IMAGE_SIZE as f64 / 2.0, IMAGE_SIZE as f64 / 2.0),
        (IMAGE_SIZE as u32, IMAGE_SIZE as u32),
    );
    let mut images = Vec::with_capacity(count);
    for step in 0..count {
        let theta = (step as f64 - (count as f64 - 1.0) / 2.0) * STEP_DEG.to_radians();
        let eye = [
            ORBIT_RADIUS * theta.sin(),
            0.0,
            -ORBIT_RADIUS * theta.cos(),
        ];
        let extrinsics = CameraExtrinsics::look_at(&eye, &[0.0; 3], &[0.0, -1.0, 0.0])?;
        images.push(render_view(&PinholeCamera::new(intrinsics.clone(), extrinsics))?);
    }
    Ok((images, vec![intrinsics; count]))
}

#[test]
fn reconstructs_a_textured_cube_from_an_orbit() -> Result<(), Box<dyn Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (images, intrinsics) = orbit_rig(5)?;
    let config = ReconstructionConfig {
        atlas_size: 512,
        ..Default::default()
    };

    let trace: Arc<Mutex<Vec<(Stage, f32)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = trace.clone();
    let hooks = Hooks::new().with_progress(move |stage, fraction| {
        sink.lock().unwrap().push((stage, fraction));
    });

    let mut recon = Reconstruction::new(config);
    recon.set_intrinsics(intrinsics);
    let result = recon.run(&images, &hooks)?;

    // every view registered, consecutive centers one baseline apart (the
    // first pair pins the gauge at baseline 1)
    assert_eq!(result.cameras.len(), 5);
    for pair in result.cameras.windows(2) {
        let a = pair[0].extrinsics.camera_center();
        let b = pair[1].extrinsics.camera_center();
        let dist =
            ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2) + (b[2] - a[2]).powi(2)).sqrt();
        assert!((0.6..1.6).contains(&dist), "camera spacing {dist}");
    }

    let mesh = &result.mesh;
    assert!(mesh.triangle_count() > 0);
    mesh.validate_indices()?;

    let normals = mesh.normals.as_ref().expect("decimation recomputes normals");
    assert_eq!(normals.len(), mesh.vertex_count());
    let uvs = mesh.uvs.as_ref().expect("unwrap assigns texture coordinates");
    assert_eq!(uvs.len(), mesh.vertex_count());
    assert!(uvs
        .iter()
        .all(|uv| (0.0..=1.0).contains(&uv[0]) && (0.0..=1.0).contains(&uv[1])));

    // the observed face sheet must have the cube's width and height and
    // sit at the true distance in front of the first camera; the true
    // first-pair baseline converts gauge units back to world units
    let scale = 2.0 * ORBIT_RADIUS * (STEP_DEG / 2.0).to_radians().sin();
    let (min, max) = mesh.bounds().expect("mesh is not empty");
    let width = (max[0] - min[0]) * scale;
    let height = (max[1] - min[1]) * scale;
    let thickness = (max[2] - min[2]) * scale;
    assert!((0.7..1.4).contains(&width), "width {width}");
    assert!((0.7..1.4).contains(&height), "height {height}");
    assert!(thickness > 0.0 && thickness < 1.4, "thickness {thickness}");

    let mid = [
        (min[0] + max[0]) / 2.0 * scale,
        (min[1] + max[1]) / 2.0 * scale,
        (min[2] + max[2]) / 2.0 * scale,
    ];
    assert!(mid[0].abs() < 0.7, "lateral offset {}", mid[0]);
    assert!(mid[1].abs() < 0.7, "vertical offset {}", mid[1]);
    assert!((2.8..4.5).contains(&mid[2]), "sheet depth {}", mid[2]);

    // the atlas must actually be painted from the photographs
    assert_eq!(result.atlas.width(), 512);
    assert_eq!(result.atlas.height(), 512);
    let textured = result
        .atlas
        .as_slice()
        .chunks_exact(3)
        .filter(|texel| texel[0] != 128 || texel[1] != 128 || texel[2] != 128)
        .count();
    assert!(textured > 1000, "{textured} textured texels");

    // stages report in pipeline order, each from 0 up to 1
    let trace = trace.lock().unwrap();
    let mut order: Vec<Stage> = Vec::new();
    let mut peak = [0.0f32; 8];
    for &(stage, fraction) in trace.iter() {
        assert!((0.0..=1.0).contains(&fraction));
        let idx = Stage::ALL.iter().position(|&s| s == stage).unwrap();
        assert!(fraction >= peak[idx], "{stage} progress went backwards");
        peak[idx] = fraction;
        if !order.contains(&stage) {
            order.push(stage);
        }
    }
    assert_eq!(order, Stage::ALL);
    assert_eq!(peak, [1.0; 8]);

    // obj export: one record per vertex attribute and face, plus the
    // material chain obj -> mtl -> png
    let dir = tempfile::tempdir()?;
    result.export_obj(dir.path(), "cube")?;
    let obj = std::fs::read_to_string(dir.path().join("cube.obj"))?;
    assert!(obj.starts_with("mtllib cube.mtl"));
    let records = |prefix: &str| obj.lines().filter(|l| l.starts_with(prefix)).count();
    assert_eq!(records("v "), mesh.vertex_count());
    assert_eq!(records("vt "), mesh.vertex_count());
    assert_eq!(records("vn "), mesh.vertex_count());
    assert_eq!(records("f "), mesh.triangle_count());
    let mtl = std::fs::read_to_string(dir.path().join("cube.mtl"))?;
    assert!(mtl.contains("map_Kd cube.png"));
    let png = std::fs::read(dir.path().join("cube.png"))?;
    assert_eq!(&png[..4], b"\x89PNG");

    // binary asset round-trip
    let asset_path = dir.path().join("cube.pxa");
    result.export_asset(&asset_path)?;
    let asset = read_asset(&asset_path)?;
    assert_eq!(asset.vertices.len(), mesh.vertex_count());
    assert_eq!(asset.triangles.len(), mesh.triangle_count());
    assert_eq!(asset.to_atlas()?.as_slice(), result.atlas.as_slice());

    Ok(())
}

#[test]
fn a_single_image_is_rejected() -> Result<(), Box<dyn Error>> {
    let size = ImageSize {
        width: 64,
        height: 64,
    };
    let image: Image<u8, 3> = Image::from_size_val(size, 0)?;
    let err = reconstruct(&[image], &ReconstructionConfig::default(), &Hooks::new()).unwrap_err();
    assert!(matches!(
        err,
        ReconError::Input {
            stage: Stage::Features,
            ..
        }
    ));
    Ok(())
}

#[test]
fn featureless_views_fail_in_the_feature_stage() -> Result<(), Box<dyn Error>> {
    let size = ImageSize {
        width: 64,
        height: 64,
    };
    let flat: Image<u8, 3> = Image::from_size_val(size, 90)?;
    let err = reconstruct(
        &[flat.clone(), flat],
        &ReconstructionConfig::default(),
        &Hooks::new(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ReconError::Geometry {
            stage: Stage::Features,
            ..
        }
    ));
    Ok(())
}

#[test]
fn a_cancelled_token_stops_before_any_work() -> Result<(), Box<dyn Error>> {
    let size = ImageSize {
        width: 64,
        height: 64,
    };
    let flat: Image<u8, 3> = Image::from_size_val(size, 90)?;
    let token = CancelToken::new();
    token.cancel();
    let hooks = Hooks::new().with_cancel(token);
    let err = reconstruct(&[flat.clone(), flat], &ReconstructionConfig::default(), &hooks)
        .unwrap_err();
    assert!(matches!(
        err,
        ReconError::Cancelled {
            stage: Stage::Features
        }
    ));
    Ok(())
}

#[test]
fn cancelling_during_sfm_stops_there() -> Result<(), Box<dyn Error>> {
    let (images, intrinsics) = orbit_rig(3)?;
    let token = CancelToken::new();
    let watcher = token.clone();
    let hooks = Hooks::new()
        .with_cancel(token)
        .with_progress(move |stage, _| {
            if stage == Stage::Sfm {
                watcher.cancel();
            }
        });
    let mut recon = Reconstruction::new(ReconstructionConfig::default());
    recon.set_intrinsics(intrinsics);
    let err = recon.run(&images, &hooks).unwrap_err();
    assert!(matches!(err, ReconError::Cancelled { stage: Stage::Sfm }));
    Ok(())
}
