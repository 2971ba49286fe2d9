use glam::DVec3;

/// A point cloud with points, colors, and normals.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
    // The normals of the points.
    normals: Option<Vec<[f64; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points, colors (optional), and normals (optional).
    pub fn new(
        points: Vec<[f64; 3]>,
        colors: Option<Vec<[u8; 3]>>,
        normals: Option<Vec<[f64; 3]>>,
    ) -> Self {
        Self {
            points,
            colors,
            normals,
        }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &Vec<[f64; 3]> {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&Vec<[u8; 3]>> {
        self.colors.as_ref()
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&Vec<[f64; 3]>> {
        self.normals.as_ref()
    }

    /// Replace the normals of the point cloud.
    ///
    /// PRECONDITION: `normals.len()` equals the number of points.
    pub fn set_normals(&mut self, normals: Vec<[f64; 3]>) {
        debug_assert_eq!(normals.len(), self.points.len());
        self.normals = Some(normals);
    }

    /// Append another point cloud, keeping colors/normals only when both sides have them.
    pub fn extend(&mut self, other: &PointCloud) {
        self.points.extend_from_slice(&other.points);
        self.colors = match (self.colors.take(), other.colors()) {
            (Some(mut a), Some(b)) => {
                a.extend_from_slice(b);
                Some(a)
            }
            _ => None,
        };
        self.normals = match (self.normals.take(), other.normals()) {
            (Some(mut a), Some(b)) => {
                a.extend_from_slice(b);
                Some(a)
            }
            _ => None,
        };
    }

    /// Keep only the points selected by the mask, along with their colors and normals.
    ///
    /// PRECONDITION: `mask.len()` equals the number of points.
    pub fn select(&self, mask: &[bool]) -> PointCloud {
        debug_assert_eq!(mask.len(), self.points.len());
        let filter_by_mask = |v: &Vec<[f64; 3]>| -> Vec<[f64; 3]> {
            v.iter()
                .zip(mask.iter())
                .filter(|(_, &keep)| keep)
                .map(|(p, _)| *p)
                .collect()
        };
        PointCloud {
            points: filter_by_mask(&self.points),
            colors: self.colors.as_ref().map(|colors| {
                colors
                    .iter()
                    .zip(mask.iter())
                    .filter(|(_, &keep)| keep)
                    .map(|(c, _)| *c)
                    .collect()
            }),
            normals: self.normals.as_ref().map(filter_by_mask),
        }
    }

    /// Convert a point from [f64; 3] to DVec3.
    fn point_to_vec3(point: &[f64; 3]) -> DVec3 {
        DVec3::new(point[0], point[1], point[2])
    }

    /// Get the minimum bound of the point cloud.
    pub fn get_min_bound(&self) -> DVec3 {
        if self.points.is_empty() {
            return DVec3::ZERO;
        }
        self.points()
            .iter()
            .map(|&point| Self::point_to_vec3(&point))
            .fold(Self::point_to_vec3(&self.points[0]), |a, b| a.min(b))
    }

    /// Get the maximum bound of the point cloud.
    pub fn get_max_bound(&self) -> DVec3 {
        if self.points.is_empty() {
            return DVec3::ZERO;
        }
        self.points()
            .iter()
            .map(|&point| Self::point_to_vec3(&point))
            .fold(Self::point_to_vec3(&self.points[0]), |a, b| a.max(b))
    }

    /// Get the centroid of the point cloud.
    pub fn centroid(&self) -> DVec3 {
        if self.points.is_empty() {
            return DVec3::ZERO;
        }
        let sum = self
            .points
            .iter()
            .fold(DVec3::ZERO, |acc, p| acc + Self::point_to_vec3(p));
        sum / self.points.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pointcloud_basic() {
        let points = vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]];
        let colors = vec![[0u8, 0, 0], [255, 255, 255]];
        let cloud = PointCloud::new(points, Some(colors), None);
        assert_eq!(cloud.len(), 2);
        assert!(!cloud.is_empty());
        assert!(cloud.normals().is_none());
    }

    #[test]
    fn pointcloud_bounds() {
        let cloud = PointCloud::new(
            vec![[1.0, -2.0, 0.5], [-1.0, 3.0, 2.0], [0.0, 0.0, -4.0]],
            None,
            None,
        );
        let min = cloud.get_min_bound();
        let max = cloud.get_max_bound();
        assert_relative_eq!(min.x, -1.0);
        assert_relative_eq!(min.y, -2.0);
        assert_relative_eq!(min.z, -4.0);
        assert_relative_eq!(max.x, 1.0);
        assert_relative_eq!(max.y, 3.0);
        assert_relative_eq!(max.z, 2.0);
    }

    #[test]
    fn pointcloud_select() {
        let cloud = PointCloud::new(
            vec![[0.0; 3], [1.0; 3], [2.0; 3]],
            Some(vec![[0u8; 3], [1u8; 3], [2u8; 3]]),
            Some(vec![[0.0, 0.0, 1.0]; 3]),
        );
        let selected = cloud.select(&[true, false, true]);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected.points()[1], [2.0; 3]);
        assert_eq!(selected.colors().unwrap()[1], [2u8; 3]);
        assert_eq!(selected.normals().unwrap().len(), 2);
    }

    #[test]
    fn pointcloud_extend() {
        let mut a = PointCloud::new(vec![[0.0; 3]], Some(vec![[1u8; 3]]), None);
        let b = PointCloud::new(vec![[1.0; 3]], Some(vec![[2u8; 3]]), None);
        a.extend(&b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.colors().unwrap().len(), 2);
    }

    #[test]
    fn empty_cloud_bounds_are_zero() {
        let cloud = PointCloud::default();
        assert_eq!(cloud.get_min_bound(), DVec3::ZERO);
        assert_eq!(cloud.get_max_bound(), DVec3::ZERO);
    }
}
