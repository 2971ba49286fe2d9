use crate::error::MeshError;

/// Hard cap on the octree depth.
pub const MAX_OCTREE_DEPTH: usize = 7;

/// Configuration for octree construction.
#[derive(Debug, Clone)]
pub struct OctreeConfig {
    /// Maximum subdivision depth, clamped to [`MAX_OCTREE_DEPTH`].
    pub max_depth: usize,
    /// Leaves holding more points than this are split.
    pub leaf_capacity: usize,
    /// Fraction by which the bounding cube is expanded around the cloud.
    pub padding: f64,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            leaf_capacity: 10,
            padding: 0.1,
        }
    }
}

/// One octree node, either an interior node or a leaf holding point indices.
#[derive(Debug, Clone)]
pub struct OctreeNode {
    /// Center of the node cube.
    pub center: [f64; 3],
    /// Half edge length of the node cube.
    pub half: f64,
    /// Depth of the node, the root is at depth 0.
    pub depth: usize,
    /// Child node indices for interior nodes.
    pub children: Option<[u32; 8]>,
    /// Indices of the points stored in a leaf.
    pub points: Vec<u32>,
}

impl OctreeNode {
    /// Whether the node is a leaf.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// An adaptive octree over a point set.
///
/// The root covers a padded cube around the points. Leaves are split until
/// they hold at most `leaf_capacity` points or the depth cap is reached.
#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    min: [f64; 3],
    size: f64,
    occupied_depth: usize,
}

impl Octree {
    /// Build an octree over the given points.
    ///
    /// # Errors
    ///
    /// Fails when the point set is empty or its bounds collapse to a point.
    pub fn build(points: &[[f64; 3]], config: &OctreeConfig) -> Result<Self, MeshError> {
        if points.is_empty() {
            return Err(MeshError::TooFewPoints {
                points: 0,
                required: 1,
            });
        }

        let mut min = points[0];
        let mut max = points[0];
        for p in points {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        let extent = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
        let largest = extent[0].max(extent[1]).max(extent[2]);
        if largest < 1e-12 {
            return Err(MeshError::DegenerateBounds(extent[0], extent[1], extent[2]));
        }

        let size = largest * (1.0 + config.padding);
        let center = [
            (min[0] + max[0]) / 2.0,
            (min[1] + max[1]) / 2.0,
            (min[2] + max[2]) / 2.0,
        ];
        let cube_min = [
            center[0] - size / 2.0,
            center[1] - size / 2.0,
            center[2] - size / 2.0,
        ];

        let max_depth = config.max_depth.min(MAX_OCTREE_DEPTH);
        let mut tree = Self {
            nodes: vec![OctreeNode {
                center,
                half: size / 2.0,
                depth: 0,
                children: None,
                points: (0..points.len() as u32).collect(),
            }],
            min: cube_min,
            size,
            occupied_depth: 0,
        };
        tree.split(0, points, max_depth, config.leaf_capacity);
        Ok(tree)
    }

    fn split(&mut self, node: usize, points: &[[f64; 3]], max_depth: usize, capacity: usize) {
        let depth = self.nodes[node].depth;
        self.occupied_depth = self.occupied_depth.max(depth);
        if depth >= max_depth || self.nodes[node].points.len() <= capacity {
            return;
        }

        let center = self.nodes[node].center;
        let quarter = self.nodes[node].half / 2.0;
        let indices = std::mem::take(&mut self.nodes[node].points);

        let mut buckets: [Vec<u32>; 8] = Default::default();
        for idx in indices {
            let p = &points[idx as usize];
            let octant = usize::from(p[0] >= center[0])
                | usize::from(p[1] >= center[1]) << 1
                | usize::from(p[2] >= center[2]) << 2;
            buckets[octant].push(idx);
        }

        let mut children = [0u32; 8];
        for (octant, bucket) in buckets.into_iter().enumerate() {
            let child_center = [
                center[0] + if octant & 1 != 0 { quarter } else { -quarter },
                center[1] + if octant & 2 != 0 { quarter } else { -quarter },
                center[2] + if octant & 4 != 0 { quarter } else { -quarter },
            ];
            let child = self.nodes.len();
            children[octant] = child as u32;
            self.nodes.push(OctreeNode {
                center: child_center,
                half: quarter,
                depth: depth + 1,
                children: None,
                points: bucket,
            });
            self.split(child, points, max_depth, capacity);
        }
        self.nodes[node].children = Some(children);
    }

    /// Minimum corner and edge length of the root cube.
    pub fn bounds(&self) -> ([f64; 3], f64) {
        (self.min, self.size)
    }

    /// Deepest level that actually holds nodes.
    pub fn occupied_depth(&self) -> usize {
        self.occupied_depth
    }

    /// Grid resolution matching the deepest subdivision, `2^depth`.
    pub fn grid_resolution(&self) -> usize {
        1 << self.occupied_depth
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Access a node by index, the root is node 0.
    pub fn node(&self, idx: usize) -> &OctreeNode {
        &self.nodes[idx]
    }

    /// Index of the leaf whose cube contains the point.
    pub fn locate(&self, p: &[f64; 3]) -> Option<usize> {
        let half = self.size / 2.0;
        let root = &self.nodes[0];
        for i in 0..3 {
            if (p[i] - root.center[i]).abs() > half {
                return None;
            }
        }
        let mut node = 0usize;
        while let Some(children) = &self.nodes[node].children {
            let center = self.nodes[node].center;
            let octant = usize::from(p[0] >= center[0])
                | usize::from(p[1] >= center[1]) << 1
                | usize::from(p[2] >= center[2]) << 2;
            node = children[octant] as usize;
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scatter(n: usize) -> Vec<[f64; 3]> {
        // deterministic low-discrepancy scatter in the unit cube
        (0..n)
            .map(|i| {
                let t = i as f64;
                [
                    (t * 0.754_877_666).fract(),
                    (t * 0.569_840_291).fract(),
                    (t * 0.338_955_121).fract(),
                ]
            })
            .collect()
    }

    #[test]
    fn leaves_respect_capacity_or_depth() -> Result<(), MeshError> {
        let points = scatter(1000);
        let config = OctreeConfig::default();
        let tree = Octree::build(&points, &config)?;

        let mut total = 0;
        for i in 0..tree.node_count() {
            let node = tree.node(i);
            if node.is_leaf() {
                assert!(node.points.len() <= config.leaf_capacity || node.depth == 6);
                total += node.points.len();
            } else {
                assert!(node.points.is_empty());
            }
        }
        assert_eq!(total, points.len());
        Ok(())
    }

    #[test]
    fn locate_finds_the_owning_leaf() -> Result<(), MeshError> {
        let points = scatter(200);
        let tree = Octree::build(&points, &OctreeConfig::default())?;

        for (i, p) in points.iter().enumerate().step_by(17) {
            let leaf = tree.locate(p).unwrap();
            assert!(tree.node(leaf).points.contains(&(i as u32)));
        }
        assert!(tree.locate(&[100.0, 0.0, 0.0]).is_none());
        Ok(())
    }

    #[test]
    fn depth_cap_is_enforced() -> Result<(), MeshError> {
        let points = scatter(5000);
        let config = OctreeConfig {
            max_depth: 12,
            leaf_capacity: 1,
            padding: 0.1,
        };
        let tree = Octree::build(&points, &config)?;
        assert!(tree.occupied_depth() <= MAX_OCTREE_DEPTH);
        assert_eq!(tree.grid_resolution(), 1 << tree.occupied_depth());
        Ok(())
    }

    #[test]
    fn empty_and_degenerate_inputs_fail() {
        assert!(matches!(
            Octree::build(&[], &OctreeConfig::default()),
            Err(MeshError::TooFewPoints { .. })
        ));
        let same = vec![[1.0, 2.0, 3.0]; 50];
        assert!(matches!(
            Octree::build(&same, &OctreeConfig::default()),
            Err(MeshError::DegenerateBounds(_, _, _))
        ));
    }

    #[test]
    fn cube_is_padded_around_the_cloud() -> Result<(), MeshError> {
        let points = scatter(100);
        let tree = Octree::build(&points, &OctreeConfig::default())?;
        let (min, size) = tree.bounds();
        for p in &points {
            for i in 0..3 {
                assert!(p[i] > min[i] && p[i] < min[i] + size);
            }
        }
        Ok(())
    }
}
