use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;

use parallax_3d::cloud::{
    cloud_from_depth, estimate_normals, remove_statistical_outliers, NormalEstimationConfig,
    OutlierFilterConfig,
};
use parallax_3d::linalg::{mat3_mul_vec3, mat3_transpose, matmul33};
use parallax_3d::sfm::{
    bundle_adjust, estimate_two_view, triangulate_world, BundleAdjustParams, Observation,
    TwoViewConfig,
};
use parallax_3d::stereo::{
    block_match_disparity, depth_from_disparity, DepthMap, StereoConfig, StereoError,
};
use parallax_3d::PointCloud;
use parallax_features::{
    extract_features, match_descriptors, DetectorConfig, FeatureMatch, Features, MatcherConfig,
};
use parallax_image::color::gray_from_rgb_u8;
use parallax_image::{CameraExtrinsics, CameraIntrinsics, Image, ImageSize, PinholeCamera};
use parallax_io::asset::{write_asset, TexturedAsset};
use parallax_io::obj::write_obj_with_material;
use parallax_io::png::write_image_png_rgb8;
use parallax_mesh::decimate::decimate;
use parallax_mesh::marching::marching_cubes;
use parallax_mesh::octree::{Octree, OctreeConfig};
use parallax_mesh::poisson::{solve_indicator, PoissonConfig};
use parallax_mesh::smooth::{laplacian_smooth, SmoothConfig};
use parallax_mesh::{MeshError, TriangleMesh};
use parallax_texture::bake::{bake_texture, BakeConfig, TextureView};
use parallax_texture::lscm::{unwrap_mesh, UnwrapConfig};

use crate::config::ReconstructionConfig;
use crate::error::{ReconError, Stage};
use crate::hooks::Hooks;

/// Focal length assumed when no intrinsics are given, as a multiple of the
/// longest image side.
const DEFAULT_FOCAL_FACTOR: f64 = 1.2;

/// Largest relative rotation tolerated for a scanline stereo pair.
const MAX_PAIR_ROTATION_DEG: f64 = 25.0;

/// Fraction of the baseline that must lie along the left camera x axis for
/// a pair to count as rectified.
const MIN_HORIZONTAL_BASELINE: f64 = 0.7;

/// Tracked points a view must share with its predecessor to be registered.
const MIN_REGISTRATION_POINTS: usize = 6;

/// Bundle iterations of the windowed refinement after each registration.
const REGISTRATION_BA_ITERS: usize = 5;

/// A sparse 3D point and the keypoint observations supporting it.
struct Track {
    point: [f64; 3],
    /// Pairs of (view index, keypoint index).
    obs: Vec<(usize, usize)>,
}

/// A reconstruction context: the configuration plus the intermediate
/// products of the most recent run.
///
/// Contexts share no global state; several may run concurrently on
/// separate image sets.
pub struct Reconstruction {
    config: ReconstructionConfig,
    intrinsics: Option<Vec<CameraIntrinsics>>,
    cameras: Vec<PinholeCamera>,
    sparse: Vec<[f64; 3]>,
    cloud: PointCloud,
}

impl Reconstruction {
    /// Create a context with the given configuration.
    pub fn new(config: ReconstructionConfig) -> Self {
        Self {
            config,
            intrinsics: None,
            cameras: Vec::new(),
            sparse: Vec::new(),
            cloud: PointCloud::new(Vec::new(), None, None),
        }
    }

    /// Provide approximate per-view intrinsics.
    ///
    /// Without them every view gets defaults derived from its dimensions:
    /// focal length `1.2 * max(width, height)` and the principal point at
    /// the image center. The count must match the image count given to
    /// [`Self::run`].
    pub fn set_intrinsics(&mut self, intrinsics: Vec<CameraIntrinsics>) {
        self.intrinsics = Some(intrinsics);
    }

    /// The refined camera of every view from the last run, in input order.
    pub fn cameras(&self) -> &[PinholeCamera] {
        &self.cameras
    }

    /// The sparse triangulated points of the last run.
    pub fn sparse_points(&self) -> &[[f64; 3]] {
        &self.sparse
    }

    /// The fused, filtered and oriented dense cloud of the last run.
    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    /// Run the full pipeline over an ordered image sequence.
    ///
    /// The stages execute in order: features, sfm, stereo, cloud, surface,
    /// decimate, unwrap, bake. Each stage reports progress through `hooks`
    /// and polls its cancel token; a cancelled run fails with
    /// [`ReconError::Cancelled`] naming the stage it stopped in.
    pub fn run(
        &mut self,
        images: &[Image<u8, 3>],
        hooks: &Hooks,
    ) -> Result<ReconstructionResult, ReconError> {
        self.config.validate()?;
        self.validate_input(images)?;
        let total = Instant::now();

        hooks.enter(Stage::Features)?;
        let start = Instant::now();
        let grays = grayscale(images)?;
        let (features, pair_matches) = self.run_features(&grays, hooks)?;
        hooks.leave(Stage::Features);
        log::info!("features: {} views in {:?}", images.len(), start.elapsed());

        hooks.enter(Stage::Sfm)?;
        let start = Instant::now();
        self.run_sfm(images, &features, &pair_matches, hooks)?;
        hooks.leave(Stage::Sfm);
        log::info!(
            "sfm: {} cameras, {} sparse points in {:?}",
            self.cameras.len(),
            self.sparse.len(),
            start.elapsed()
        );

        hooks.enter(Stage::Stereo)?;
        let start = Instant::now();
        let depths = self.run_stereo(&grays, hooks)?;
        hooks.leave(Stage::Stereo);
        log::info!("stereo: {} depth maps in {:?}", depths.len(), start.elapsed());

        hooks.enter(Stage::Cloud)?;
        let start = Instant::now();
        self.run_cloud(images, &depths, hooks)?;
        hooks.leave(Stage::Cloud);
        log::info!(
            "cloud: {} oriented points in {:?}",
            self.cloud.len(),
            start.elapsed()
        );

        hooks.enter(Stage::Surface)?;
        let start = Instant::now();
        let mesh = self.run_surface(hooks)?;
        hooks.leave(Stage::Surface);
        log::info!(
            "surface: {} triangles in {:?}",
            mesh.triangle_count(),
            start.elapsed()
        );

        hooks.enter(Stage::Decimate)?;
        let start = Instant::now();
        let mut mesh = self.run_decimate(&mesh, hooks)?;
        hooks.leave(Stage::Decimate);
        log::info!(
            "decimate: {} triangles in {:?}",
            mesh.triangle_count(),
            start.elapsed()
        );

        hooks.enter(Stage::Unwrap)?;
        let start = Instant::now();
        self.run_unwrap(&mut mesh, hooks)?;
        hooks.leave(Stage::Unwrap);
        log::info!(
            "unwrap: {} vertices parameterized in {:?}",
            mesh.vertex_count(),
            start.elapsed()
        );

        hooks.enter(Stage::Bake)?;
        let start = Instant::now();
        let atlas = self.run_bake(&mesh, images, hooks)?;
        hooks.leave(Stage::Bake);
        log::info!(
            "bake: {}x{} atlas in {:?}",
            atlas.width(),
            atlas.height(),
            start.elapsed()
        );

        log::info!("reconstruction finished in {:?}", total.elapsed());
        Ok(ReconstructionResult {
            mesh,
            atlas,
            cameras: self.cameras.clone(),
        })
    }

    fn validate_input(&self, images: &[Image<u8, 3>]) -> Result<(), ReconError> {
        if images.len() < 2 {
            return Err(ReconError::input(
                Stage::Features,
                format!("{} images given, at least 2 required", images.len()),
            ));
        }
        let size = images[0].size();
        for (v, image) in images.iter().enumerate().skip(1) {
            if image.size() != size {
                return Err(ReconError::input(
                    Stage::Features,
                    format!("image {v} is {}, image 0 is {}", image.size(), size),
                ));
            }
        }
        if let Some(ks) = &self.intrinsics {
            if ks.len() != images.len() {
                return Err(ReconError::input(
                    Stage::Features,
                    format!("{} intrinsics given for {} images", ks.len(), images.len()),
                ));
            }
        }
        Ok(())
    }

    /// Intrinsics for a view: the user-provided ones or size-derived defaults.
    fn view_intrinsics(&self, view: usize, size: ImageSize) -> CameraIntrinsics {
        match self.intrinsics.as_ref().and_then(|ks| ks.get(view)) {
            Some(k) => k.clone(),
            None => {
                let focal = DEFAULT_FOCAL_FACTOR * size.width.max(size.height) as f64;
                CameraIntrinsics::new(
                    (focal, focal),
                    (size.width as f64 / 2.0, size.height as f64 / 2.0),
                    (size.width as u32, size.height as u32),
                )
            }
        }
    }

    /// Detect, describe and match keypoints across consecutive view pairs.
    fn run_features(
        &self,
        grays: &[Image<f32, 1>],
        hooks: &Hooks,
    ) -> Result<(Vec<Features>, Vec<Vec<FeatureMatch>>), ReconError> {
        let detector = DetectorConfig::default();
        let features = grays
            .par_iter()
            .map(|gray| extract_features(gray, &detector))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ReconError::input(Stage::Features, e))?;
        for (v, f) in features.iter().enumerate() {
            log::debug!("view {v}: {} keypoints", f.len());
        }
        hooks.check(Stage::Features)?;
        hooks.report(Stage::Features, 0.5);

        let matcher = MatcherConfig {
            ratio: self.config.match_ratio,
            ..Default::default()
        };
        let pair_matches: Vec<Vec<FeatureMatch>> = (0..features.len() - 1)
            .into_par_iter()
            .map(|i| {
                match_descriptors(
                    &features[i].descriptors,
                    &features[i + 1].descriptors,
                    &matcher,
                )
            })
            .collect();

        let found: usize = pair_matches.iter().map(Vec::len).sum();
        if found == 0 {
            return Err(ReconError::geometry(
                Stage::Features,
                format!("0 usable matches across {} view pairs", pair_matches.len()),
            ));
        }
        log::debug!("{found} matches across {} view pairs", pair_matches.len());
        Ok((features, pair_matches))
    }

    /// Recover every camera pose and a sparse track table.
    ///
    /// The first pair is solved with the essential matrix and pins the
    /// gauge; each later view inherits the pose of its predecessor and is
    /// pulled into place by a short bundle adjustment over everything
    /// registered so far, after which fresh tracks are triangulated from
    /// its unclaimed matches. A final adjustment refines the whole set.
    fn run_sfm(
        &mut self,
        images: &[Image<u8, 3>],
        features: &[Features],
        pair_matches: &[Vec<FeatureMatch>],
        hooks: &Hooks,
    ) -> Result<(), ReconError> {
        let n = features.len();
        let intrinsics: Vec<CameraIntrinsics> = (0..n)
            .map(|v| self.view_intrinsics(v, images[v].size()))
            .collect();

        // bootstrap pair
        let seed_matches = &pair_matches[0];
        let x1: Vec<[f64; 2]> = seed_matches
            .iter()
            .map(|m| keypoint(&features[0], m.query_idx))
            .collect();
        let x2: Vec<[f64; 2]> = seed_matches
            .iter()
            .map(|m| keypoint(&features[1], m.train_idx))
            .collect();
        let two_view = estimate_two_view(
            &x1,
            &x2,
            &intrinsics[0],
            &intrinsics[1],
            &TwoViewConfig::default(),
        )
        .map_err(|e| ReconError::geometry(Stage::Sfm, e))?;
        hooks.check(Stage::Sfm)?;

        let mut cameras = vec![
            PinholeCamera::new(intrinsics[0].clone(), CameraExtrinsics::identity()),
            PinholeCamera::new(
                intrinsics[1].clone(),
                CameraExtrinsics {
                    rotation: two_view.rotation,
                    translation: two_view.translation,
                },
            ),
        ];

        let mut tracks: Vec<Track> = Vec::with_capacity(two_view.points3d.len());
        let mut kp_track: Vec<HashMap<usize, usize>> = vec![HashMap::new(); n];
        for (point, &match_idx) in two_view.points3d.iter().zip(&two_view.point_indices) {
            let m = &seed_matches[match_idx];
            let track_idx = tracks.len();
            tracks.push(Track {
                point: *point,
                obs: vec![(0, m.query_idx), (1, m.train_idx)],
            });
            kp_track[0].insert(m.query_idx, track_idx);
            kp_track[1].insert(m.train_idx, track_idx);
        }
        log::debug!(
            "bootstrap: {} tracks from {} matches ({} ransac inliers)",
            tracks.len(),
            seed_matches.len(),
            two_view.inlier_count
        );
        hooks.report(Stage::Sfm, 2.0 / n as f32);

        for v in 2..n {
            let matched = &pair_matches[v - 1];

            // extend tracks seen in the previous view into this one
            let mut seeded = 0usize;
            for m in matched {
                if let Some(&track_idx) = kp_track[v - 1].get(&m.query_idx) {
                    if kp_track[v].contains_key(&m.train_idx) {
                        continue;
                    }
                    tracks[track_idx].obs.push((v, m.train_idx));
                    kp_track[v].insert(m.train_idx, track_idx);
                    seeded += 1;
                }
            }
            if seeded < MIN_REGISTRATION_POINTS {
                return Err(ReconError::geometry(
                    Stage::Sfm,
                    format!(
                        "view {v} shares {seeded} tracked points with view {}, \
                         {MIN_REGISTRATION_POINTS} required",
                        v - 1
                    ),
                ));
            }

            // the new pose starts at its predecessor; the windowed
            // adjustment below acts as the resection
            cameras.push(PinholeCamera::new(
                intrinsics[v].clone(),
                cameras[v - 1].extrinsics.clone(),
            ));

            let mut points: Vec<[f64; 3]> = tracks.iter().map(|t| t.point).collect();
            let observations = gather_observations(&tracks, features);
            let params = BundleAdjustParams {
                max_iters: REGISTRATION_BA_ITERS,
                ..Default::default()
            };
            let summary = bundle_adjust(
                &mut cameras,
                &mut points,
                &observations,
                &params,
                Some(&|| hooks.cancelled()),
            )
            .map_err(|e| ReconError::geometry(Stage::Sfm, e))?;
            hooks.check(Stage::Sfm)?;
            scatter_points(&mut tracks, &points);
            log::debug!(
                "view {v} registered on {seeded} tracks, rmse {:.3} -> {:.3}",
                summary.initial_rmse,
                summary.final_rmse
            );

            // triangulate fresh tracks from the still-unclaimed matches
            let mut born = 0usize;
            for m in matched {
                if kp_track[v - 1].contains_key(&m.query_idx)
                    || kp_track[v].contains_key(&m.train_idx)
                {
                    continue;
                }
                let xa = intrinsics[v - 1].normalize_point(&keypoint(&features[v - 1], m.query_idx));
                let xb = intrinsics[v].normalize_point(&keypoint(&features[v], m.train_idx));
                let Some(point) =
                    triangulate_world(&cameras[v - 1].extrinsics, &cameras[v].extrinsics, &xa, &xb)
                else {
                    continue;
                };
                if cameras[v - 1].extrinsics.transform_point(&point)[2] <= 0.0
                    || cameras[v].extrinsics.transform_point(&point)[2] <= 0.0
                {
                    continue;
                }
                let track_idx = tracks.len();
                tracks.push(Track {
                    point,
                    obs: vec![(v - 1, m.query_idx), (v, m.train_idx)],
                });
                kp_track[v - 1].insert(m.query_idx, track_idx);
                kp_track[v].insert(m.train_idx, track_idx);
                born += 1;
            }
            log::debug!("view {v}: {born} new tracks, {} total", tracks.len());
            hooks.report(Stage::Sfm, (v + 1) as f32 / n as f32);
        }

        // global refinement over all cameras and points
        let mut points: Vec<[f64; 3]> = tracks.iter().map(|t| t.point).collect();
        let observations = gather_observations(&tracks, features);
        let params = BundleAdjustParams {
            max_iters: self.config.bundle_iterations,
            ..Default::default()
        };
        let summary = bundle_adjust(
            &mut cameras,
            &mut points,
            &observations,
            &params,
            Some(&|| hooks.cancelled()),
        )
        .map_err(|e| ReconError::geometry(Stage::Sfm, e))?;
        hooks.check(Stage::Sfm)?;
        log::debug!(
            "global bundle adjustment: rmse {:.3} -> {:.3} in {} iterations",
            summary.initial_rmse,
            summary.final_rmse,
            summary.iterations
        );

        self.cameras = cameras;
        self.sparse = points;
        Ok(())
    }

    /// Dense depth from consecutive registered views that pass the
    /// rectification gate.
    fn run_stereo(
        &self,
        grays: &[Image<f32, 1>],
        hooks: &Hooks,
    ) -> Result<Vec<(usize, DepthMap)>, ReconError> {
        let stereo = StereoConfig {
            block_radius: self.config.block_radius,
            max_disparity: self.config.max_disparity,
            ..Default::default()
        };

        let pairs = self.cameras.len() - 1;
        let mut depths = Vec::new();
        for i in 0..pairs {
            hooks.check(Stage::Stereo)?;
            let Some((left, right, baseline)) = rectified_pair(&self.cameras, i, i + 1) else {
                log::debug!("view pair ({i}, {}) skipped, not scanline aligned", i + 1);
                continue;
            };
            let disparity = block_match_disparity(&grays[left], &grays[right], &stereo)
                .map_err(stereo_error)?;
            let focal = self.cameras[left].intrinsics.focal_length.0;
            let depth = depth_from_disparity(&disparity, baseline, focal).map_err(stereo_error)?;
            let valid = depth.as_slice().iter().filter(|&&z| z > 0.0).count();
            log::debug!("pair ({left}, {right}): {valid} depth samples, baseline {baseline:.4}");
            depths.push((left, depth));
            hooks.report(Stage::Stereo, (i + 1) as f32 / pairs as f32);
        }

        if depths.is_empty() {
            return Err(ReconError::reconstruction(
                Stage::Stereo,
                format!("0 of {pairs} view pairs usable for scanline matching"),
            ));
        }
        Ok(depths)
    }

    /// Fuse the depth maps into one world-space cloud, filter outliers and
    /// orient normals toward the cameras.
    fn run_cloud(
        &mut self,
        images: &[Image<u8, 3>],
        depths: &[(usize, DepthMap)],
        hooks: &Hooks,
    ) -> Result<(), ReconError> {
        let mut merged = PointCloud::new(Vec::new(), Some(Vec::new()), None);
        for (i, (view, depth)) in depths.iter().enumerate() {
            hooks.check(Stage::Cloud)?;
            let part = cloud_from_depth(depth, &self.cameras[*view], Some(&images[*view]))
                .map_err(|e| ReconError::reconstruction(Stage::Cloud, e))?;
            merged.extend(&part);
            hooks.report(Stage::Cloud, 0.4 * (i + 1) as f32 / depths.len() as f32);
        }
        log::debug!(
            "fused cloud: {} points from {} depth maps",
            merged.len(),
            depths.len()
        );

        let filter = OutlierFilterConfig {
            k: self.config.neighborhood_size,
            std_mult: self.config.outlier_std_mult,
        };
        let filtered = remove_statistical_outliers(&merged, &filter)
            .map_err(|e| ReconError::reconstruction(Stage::Cloud, e))?;
        hooks.check(Stage::Cloud)?;
        hooks.report(Stage::Cloud, 0.7);

        let viewpoints: Vec<[f64; 3]> = self
            .cameras
            .iter()
            .map(|c| c.extrinsics.camera_center())
            .collect();
        let normals = estimate_normals(
            &filtered,
            &NormalEstimationConfig {
                k: self.config.neighborhood_size,
            },
            &viewpoints,
        )
        .map_err(|e| ReconError::reconstruction(Stage::Cloud, e))?;

        let mut cloud = filtered;
        cloud.set_normals(normals);
        self.cloud = cloud;
        Ok(())
    }

    /// Implicit solve over the oriented cloud, iso-surface extraction and
    /// Laplacian smoothing.
    fn run_surface(&self, hooks: &Hooks) -> Result<TriangleMesh, ReconError> {
        let octree = Octree::build(
            self.cloud.points(),
            &OctreeConfig {
                max_depth: self.config.octree_depth,
                ..Default::default()
            },
        )
        .map_err(surface_error)?;
        log::debug!(
            "octree: {} nodes, {} leaves, grid {}",
            octree.node_count(),
            octree.leaf_count(),
            octree.grid_resolution()
        );
        hooks.check(Stage::Surface)?;
        hooks.report(Stage::Surface, 0.2);

        let field = solve_indicator(
            &self.cloud,
            &octree,
            &PoissonConfig::default(),
            Some(&|| hooks.cancelled()),
        )
        .map_err(surface_error)?;
        hooks.check(Stage::Surface)?;
        hooks.report(Stage::Surface, 0.6);

        let mut mesh =
            marching_cubes(&field, field.iso(), self.config.grid_resolution).map_err(surface_error)?;
        hooks.check(Stage::Surface)?;
        hooks.report(Stage::Surface, 0.9);

        laplacian_smooth(
            &mut mesh,
            &SmoothConfig {
                iterations: self.config.smooth_iterations,
                lambda: self.config.smooth_lambda,
            },
        );
        Ok(mesh)
    }

    /// Quadric decimation to the configured ratio, then fresh vertex normals.
    fn run_decimate(&self, mesh: &TriangleMesh, hooks: &Hooks) -> Result<TriangleMesh, ReconError> {
        let target = ((mesh.triangle_count() as f64 * self.config.decimation_ratio).round()
            as usize)
            .max(4);
        let mut decimated = decimate(mesh, target, Some(&|| hooks.cancelled()))
            .map_err(|e| ReconError::reconstruction(Stage::Decimate, e))?;
        hooks.check(Stage::Decimate)?;
        decimated.compute_vertex_normals();
        log::debug!(
            "decimate: {} -> {} triangles (target {target})",
            mesh.triangle_count(),
            decimated.triangle_count()
        );
        Ok(decimated)
    }

    fn run_unwrap(&self, mesh: &mut TriangleMesh, hooks: &Hooks) -> Result<(), ReconError> {
        unwrap_mesh(mesh, &UnwrapConfig::default(), Some(&|| hooks.cancelled()))
            .map_err(|e| ReconError::reconstruction(Stage::Unwrap, e))?;
        hooks.check(Stage::Unwrap)
    }

    fn run_bake(
        &self,
        mesh: &TriangleMesh,
        images: &[Image<u8, 3>],
        hooks: &Hooks,
    ) -> Result<Image<u8, 3>, ReconError> {
        let views: Vec<TextureView> = self
            .cameras
            .iter()
            .zip(images)
            .map(|(camera, image)| TextureView { camera, image })
            .collect();
        let atlas = bake_texture(
            mesh,
            &views,
            &BakeConfig {
                atlas_size: self.config.atlas_size,
            },
        )
        .map_err(|e| ReconError::reconstruction(Stage::Bake, e))?;
        hooks.check(Stage::Bake)?;
        Ok(atlas)
    }
}

/// The textured mesh and the recovered cameras of a completed run.
#[derive(Debug, Clone)]
pub struct ReconstructionResult {
    /// The reconstructed surface with normals and texture coordinates.
    pub mesh: TriangleMesh,
    /// The baked rgb8 texture atlas.
    pub atlas: Image<u8, 3>,
    /// The refined camera of every input view, in input order.
    pub cameras: Vec<PinholeCamera>,
}

impl ReconstructionResult {
    /// Export `<stem>.obj`, `<stem>.mtl` and the atlas as `<stem>.png`
    /// under `dir`.
    pub fn export_obj(&self, dir: impl AsRef<Path>, stem: &str) -> Result<(), ReconError> {
        let dir = dir.as_ref();
        let atlas_name = format!("{stem}.png");
        write_obj_with_material(dir.join(format!("{stem}.obj")), &self.mesh, &atlas_name)
            .map_err(|e| ReconError::resource(Stage::Bake, e))?;
        write_image_png_rgb8(dir.join(atlas_name), &self.atlas)
            .map_err(|e| ReconError::resource(Stage::Bake, e))
    }

    /// Package the mesh and atlas into a single binary asset file.
    pub fn export_asset(&self, path: impl AsRef<Path>) -> Result<(), ReconError> {
        let asset = TexturedAsset::from_mesh(&self.mesh, &self.atlas)
            .map_err(|e| ReconError::resource(Stage::Bake, e))?;
        write_asset(path, &asset).map_err(|e| ReconError::resource(Stage::Bake, e))
    }
}

/// Reconstruct a textured mesh from an ordered image sequence.
///
/// Convenience wrapper building a [`Reconstruction`] context with
/// size-derived default intrinsics and running it once.
pub fn reconstruct(
    images: &[Image<u8, 3>],
    config: &ReconstructionConfig,
    hooks: &Hooks,
) -> Result<ReconstructionResult, ReconError> {
    Reconstruction::new(config.clone()).run(images, hooks)
}

/// Convert the input views to unit-range grayscale.
fn grayscale(images: &[Image<u8, 3>]) -> Result<Vec<Image<f32, 1>>, ReconError> {
    images
        .par_iter()
        .map(|image| {
            let mut gray = Image::<u8, 1>::from_size_val(image.size(), 0)
                .map_err(|e| ReconError::resource(Stage::Features, e))?;
            gray_from_rgb_u8(image, &mut gray)
                .map_err(|e| ReconError::resource(Stage::Features, e))?;
            let mut gray = gray
                .cast::<f32>()
                .map_err(|e| ReconError::resource(Stage::Features, e))?;
            for v in gray.as_slice_mut() {
                *v /= 255.0;
            }
            Ok(gray)
        })
        .collect()
}

fn keypoint(features: &Features, idx: usize) -> [f64; 2] {
    let kp = &features.keypoints[idx];
    [kp.x as f64, kp.y as f64]
}

/// Flatten the track table into bundle adjustment observations.
fn gather_observations(tracks: &[Track], features: &[Features]) -> Vec<Observation> {
    let mut observations = Vec::new();
    for (point_idx, track) in tracks.iter().enumerate() {
        for &(view, kp) in &track.obs {
            observations.push(Observation {
                camera_idx: view,
                point_idx,
                pixel: keypoint(&features[view], kp),
            });
        }
    }
    observations
}

/// Write the adjusted point positions back into the track table.
fn scatter_points(tracks: &mut [Track], points: &[[f64; 3]]) {
    for (track, point) in tracks.iter_mut().zip(points) {
        track.point = *point;
    }
}

/// Decide whether two registered views can drive scanline stereo.
///
/// The relative rotation must stay below [`MAX_PAIR_ROTATION_DEG`] and the
/// baseline must be mostly horizontal in the first camera frame. The
/// returned indices are ordered so the scene slides left in the second
/// view, along with the horizontal baseline.
fn rectified_pair(
    cameras: &[PinholeCamera],
    a: usize,
    b: usize,
) -> Option<(usize, usize, f64)> {
    let ea = &cameras[a].extrinsics;
    let eb = &cameras[b].extrinsics;

    // relative rotation angle from the trace of R_b * R_a^T
    let ra_t = mat3_transpose(&ea.rotation);
    let mut rel = [[0.0; 3]; 3];
    matmul33(&eb.rotation, &ra_t, &mut rel);
    let trace = rel[0][0] + rel[1][1] + rel[2][2];
    let angle = ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos().to_degrees();
    if angle > MAX_PAIR_ROTATION_DEG {
        return None;
    }

    // baseline expressed in the first camera frame
    let ca = ea.camera_center();
    let cb = eb.camera_center();
    let world = [cb[0] - ca[0], cb[1] - ca[1], cb[2] - ca[2]];
    let t = mat3_mul_vec3(&ea.rotation, &world);
    let norm = (t[0] * t[0] + t[1] * t[1] + t[2] * t[2]).sqrt();
    if norm <= f64::EPSILON || t[0].abs() < MIN_HORIZONTAL_BASELINE * norm {
        return None;
    }

    if t[0] > 0.0 {
        Some((a, b, t[0]))
    } else {
        Some((b, a, -t[0]))
    }
}

fn stereo_error(e: StereoError) -> ReconError {
    match e {
        StereoError::InvalidGeometry { .. } => ReconError::geometry(Stage::Stereo, e),
        StereoError::Image(_) => ReconError::resource(Stage::Stereo, e),
        _ => ReconError::input(Stage::Stereo, e),
    }
}

fn surface_error(e: MeshError) -> ReconError {
    match e {
        MeshError::DegenerateBounds(..) => ReconError::geometry(Stage::Surface, e),
        _ => ReconError::reconstruction(Stage::Surface, e),
    }
}
