/// An error type for camera construction.
#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    /// The view direction is parallel to the up vector.
    #[error("Look-at direction is parallel to the up vector")]
    DegenerateLookAt,
}

/// A struct representing the intrinsic parameters of a pinhole camera.
#[derive(Debug, Clone)]
pub struct CameraIntrinsics {
    /// The focal length in pixels (fx, fy)
    pub focal_length: (f64, f64),
    /// The principal point in pixels (cx, cy)
    pub principal_point: (f64, f64),
    /// The image dimensions (width, height)
    pub image_size: (u32, u32),
}

impl CameraIntrinsics {
    /// Creates a new CameraIntrinsics with the given parameters.
    pub fn new(
        focal_length: (f64, f64),
        principal_point: (f64, f64),
        image_size: (u32, u32),
    ) -> Self {
        Self {
            focal_length,
            principal_point,
            image_size,
        }
    }

    /// Returns the camera matrix as a 3x3 row-major array.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.focal_length.0, 0.0, self.principal_point.0],
            [0.0, self.focal_length.1, self.principal_point.1],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Map a pixel coordinate to a normalized image coordinate (z = 1 plane).
    pub fn normalize_point(&self, pixel: &[f64; 2]) -> [f64; 2] {
        [
            (pixel[0] - self.principal_point.0) / self.focal_length.0,
            (pixel[1] - self.principal_point.1) / self.focal_length.1,
        ]
    }

    /// Map a normalized image coordinate back to a pixel coordinate.
    pub fn denormalize_point(&self, norm: &[f64; 2]) -> [f64; 2] {
        [
            norm[0] * self.focal_length.0 + self.principal_point.0,
            norm[1] * self.focal_length.1 + self.principal_point.1,
        ]
    }

    /// Whether a pixel coordinate falls inside the image bounds.
    pub fn contains(&self, pixel: &[f64; 2]) -> bool {
        pixel[0] >= 0.0
            && pixel[1] >= 0.0
            && pixel[0] < self.image_size.0 as f64
            && pixel[1] < self.image_size.1 as f64
    }
}

/// A struct representing the extrinsic parameters of a camera.
///
/// The transform maps world coordinates into camera coordinates:
/// `x_cam = R * x_world + t`.
#[derive(Debug, Clone)]
pub struct CameraExtrinsics {
    /// The rotation matrix in row-major order (world to camera).
    pub rotation: [[f64; 3]; 3],
    /// The translation vector (world to camera).
    pub translation: [f64; 3],
}

impl CameraExtrinsics {
    /// The identity transform (camera at the world origin, looking along +z).
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    /// Transform a point from world coordinates to camera coordinates.
    pub fn transform_point(&self, world: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * world[0] + r[0][1] * world[1] + r[0][2] * world[2] + t[0],
            r[1][0] * world[0] + r[1][1] * world[1] + r[1][2] * world[2] + t[1],
            r[2][0] * world[0] + r[2][1] * world[1] + r[2][2] * world[2] + t[2],
        ]
    }

    /// Transform a point from camera coordinates back to world coordinates.
    pub fn inverse_transform_point(&self, cam: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let d = [
            cam[0] - self.translation[0],
            cam[1] - self.translation[1],
            cam[2] - self.translation[2],
        ];
        // multiply by the transpose
        [
            r[0][0] * d[0] + r[1][0] * d[1] + r[2][0] * d[2],
            r[0][1] * d[0] + r[1][1] * d[1] + r[2][1] * d[2],
            r[0][2] * d[0] + r[1][2] * d[1] + r[2][2] * d[2],
        ]
    }

    /// The camera center in world coordinates (`-R^T * t`).
    pub fn camera_center(&self) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            -(r[0][0] * t[0] + r[1][0] * t[1] + r[2][0] * t[2]),
            -(r[0][1] * t[0] + r[1][1] * t[1] + r[2][1] * t[2]),
            -(r[0][2] * t[0] + r[1][2] * t[1] + r[2][2] * t[2]),
        ]
    }

    /// The viewing direction of the camera in world coordinates (`R^T * e_z`).
    pub fn view_direction(&self) -> [f64; 3] {
        let r = &self.rotation;
        [r[2][0], r[2][1], r[2][2]]
    }

    /// Build extrinsics for a camera placed at `eye` looking at `target`.
    ///
    /// The camera convention is x right, y down, z forward.
    ///
    /// # Errors
    ///
    /// Returns an error when the view direction is parallel to `up`.
    pub fn look_at(eye: &[f64; 3], target: &[f64; 3], up: &[f64; 3]) -> Result<Self, CameraError> {
        let f = normalize([
            target[0] - eye[0],
            target[1] - eye[1],
            target[2] - eye[2],
        ]);
        let x = cross(&f, up);
        let x_norm = (x[0] * x[0] + x[1] * x[1] + x[2] * x[2]).sqrt();
        if x_norm < 1e-12 {
            return Err(CameraError::DegenerateLookAt);
        }
        let x = [x[0] / x_norm, x[1] / x_norm, x[2] / x_norm];
        let y = cross(&f, &x);

        let rotation = [x, y, f];
        let translation = [
            -(x[0] * eye[0] + x[1] * eye[1] + x[2] * eye[2]),
            -(y[0] * eye[0] + y[1] * eye[1] + y[2] * eye[2]),
            -(f[0] * eye[0] + f[1] * eye[1] + f[2] * eye[2]),
        ];

        Ok(Self {
            rotation,
            translation,
        })
    }
}

/// A pinhole camera with intrinsic and extrinsic parameters.
#[derive(Debug, Clone)]
pub struct PinholeCamera {
    /// The intrinsic parameters.
    pub intrinsics: CameraIntrinsics,
    /// The extrinsic parameters (world to camera).
    pub extrinsics: CameraExtrinsics,
}

impl PinholeCamera {
    /// Creates a new PinholeCamera with the given parameters.
    pub fn new(intrinsics: CameraIntrinsics, extrinsics: CameraExtrinsics) -> Self {
        Self {
            intrinsics,
            extrinsics,
        }
    }

    /// Project a world point into the image plane.
    ///
    /// Returns `None` when the point lies behind the camera.
    pub fn project(&self, world: &[f64; 3]) -> Option<[f64; 2]> {
        self.project_with_depth(world).map(|(pixel, _)| pixel)
    }

    /// Project a world point into the image plane, returning the camera depth.
    ///
    /// Returns `None` when the point lies behind the camera.
    pub fn project_with_depth(&self, world: &[f64; 3]) -> Option<([f64; 2], f64)> {
        let cam = self.extrinsics.transform_point(world);
        if cam[2] <= f64::EPSILON {
            return None;
        }
        let norm = [cam[0] / cam[2], cam[1] / cam[2]];
        Some((self.intrinsics.denormalize_point(&norm), cam[2]))
    }

    /// Back-project a pixel at a given camera depth into world coordinates.
    ///
    /// The inverse of [`Self::project_with_depth`]:
    /// `x = (u - cx) * z / fx`, `y = (v - cy) * z / fy`.
    pub fn back_project(&self, pixel: &[f64; 2], depth: f64) -> [f64; 3] {
        let norm = self.intrinsics.normalize_point(pixel);
        let cam = [norm[0] * depth, norm[1] * depth, depth];
        self.extrinsics.inverse_transform_point(&cam)
    }

    /// Whether a world point projects inside the image bounds with positive depth.
    pub fn sees(&self, world: &[f64; 3]) -> bool {
        match self.project(world) {
            Some(pixel) => self.intrinsics.contains(&pixel),
            None => false,
        }
    }
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f64; 3]) -> [f64; 3] {
    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    [v[0] / n, v[1] / n, v[2] / n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new((500.0, 500.0), (320.0, 240.0), (640, 480))
    }

    #[test]
    fn project_back_project_roundtrip() -> Result<(), CameraError> {
        let extrinsics =
            CameraExtrinsics::look_at(&[2.0, 1.5, -3.0], &[0.0, 0.0, 0.0], &[0.0, 1.0, 0.0])?;
        let camera = PinholeCamera::new(test_intrinsics(), extrinsics);

        let world = [0.3, -0.2, 0.5];
        let (pixel, depth) = camera.project_with_depth(&world).unwrap();
        let back = camera.back_project(&pixel, depth);

        for i in 0..3 {
            assert_relative_eq!(back[i], world[i], epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn look_at_rotation_is_orthonormal() -> Result<(), CameraError> {
        let e = CameraExtrinsics::look_at(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0], &[0.0, 1.0, 0.0])?;
        let r = &e.rotation;
        for i in 0..3 {
            let mut norm = 0.0;
            for j in 0..3 {
                norm += r[i][j] * r[i][j];
            }
            assert_relative_eq!(norm, 1.0, epsilon = 1e-9);
        }
        // rows are mutually orthogonal
        for (a, b) in [(0, 1), (0, 2), (1, 2)] {
            let dot: f64 = (0..3).map(|j| r[a][j] * r[b][j]).sum();
            assert_relative_eq!(dot, 0.0, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn look_at_points_forward() -> Result<(), CameraError> {
        let eye = [0.0, 0.0, -5.0];
        let e = CameraExtrinsics::look_at(&eye, &[0.0, 0.0, 0.0], &[0.0, 1.0, 0.0])?;
        // the target must sit on the optical axis, in front of the camera
        let cam = e.transform_point(&[0.0, 0.0, 0.0]);
        assert_relative_eq!(cam[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(cam[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(cam[2], 5.0, epsilon = 1e-9);

        let center = e.camera_center();
        for i in 0..3 {
            assert_relative_eq!(center[i], eye[i], epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn look_at_degenerate_up() {
        let e = CameraExtrinsics::look_at(&[0.0, 1.0, 0.0], &[0.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(e.is_err());
    }

    #[test]
    fn principal_point_projects_to_center() {
        let camera = PinholeCamera::new(test_intrinsics(), CameraExtrinsics::identity());
        let pixel = camera.project(&[0.0, 0.0, 2.0]).unwrap();
        assert_relative_eq!(pixel[0], 320.0, epsilon = 1e-9);
        assert_relative_eq!(pixel[1], 240.0, epsilon = 1e-9);
    }

    #[test]
    fn behind_camera_is_rejected() {
        let camera = PinholeCamera::new(test_intrinsics(), CameraExtrinsics::identity());
        assert!(camera.project(&[0.0, 0.0, -1.0]).is_none());
        assert!(!camera.sees(&[0.0, 0.0, -1.0]));
    }
}
