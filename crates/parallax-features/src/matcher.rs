/// A correspondence between two descriptor sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    /// Index into the query keypoint set.
    pub query_idx: usize,
    /// Index into the train keypoint set.
    pub train_idx: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

/// Configuration for the brute-force matcher.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Discard matches with Hamming distance above this threshold.
    pub max_distance: Option<u32>,
    /// Keep only mutual nearest neighbors.
    pub cross_check: bool,
    /// Lowe's ratio test threshold (best / second-best must be below it).
    pub ratio: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_distance: None,
            cross_check: true,
            ratio: 0.75,
        }
    }
}

/// Hamming distance between two fixed-size byte descriptors.
#[inline]
fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x ^ y).count_ones())
        .sum()
}

/// Match binary descriptors using brute-force Hamming distance.
///
/// For each descriptor in `query`, finds the best and second-best neighbor
/// in `train` and keeps the match when `best < ratio * second_best`.
/// Cross-checking keeps mutual nearest neighbors only; independently of it,
/// a train descriptor claimed by several queries keeps the closest one.
///
/// An empty side yields an empty match list.
pub fn match_descriptors<const N: usize>(
    query: &[[u8; N]],
    train: &[[u8; N]],
    config: &MatcherConfig,
) -> Vec<FeatureMatch> {
    let m = query.len();
    let n = train.len();
    if m == 0 || n == 0 {
        return vec![];
    }

    // forward pass: best and second-best train hit per query
    let mut fwd_best_j = vec![0usize; m];
    let mut fwd_best_dist = vec![u32::MAX; m];
    let mut fwd_second_dist = vec![u32::MAX; m];

    for (i, d1) in query.iter().enumerate() {
        for (j, d2) in train.iter().enumerate() {
            let dist = hamming_distance(d1, d2);
            if dist < fwd_best_dist[i] {
                fwd_second_dist[i] = fwd_best_dist[i];
                fwd_best_dist[i] = dist;
                fwd_best_j[i] = j;
            } else if dist < fwd_second_dist[i] {
                fwd_second_dist[i] = dist;
            }
        }
    }

    // reverse pass, only needed for cross-checking
    let rev_best_i = if config.cross_check {
        let mut rev = vec![0usize; n];
        let mut rev_dist = vec![u32::MAX; n];
        for (i, d1) in query.iter().enumerate() {
            for (j, d2) in train.iter().enumerate() {
                let dist = hamming_distance(d1, d2);
                if dist < rev_dist[j] {
                    rev_dist[j] = dist;
                    rev[j] = i;
                }
            }
        }
        Some(rev)
    } else {
        None
    };

    let mut matches = Vec::new();
    for i in 0..m {
        let j = fwd_best_j[i];
        let best_dist = fwd_best_dist[i];

        if let Some(max_dist) = config.max_distance {
            if best_dist > max_dist {
                continue;
            }
        }

        if let Some(ref rev) = rev_best_i {
            if rev[j] != i {
                continue;
            }
        }

        if config.ratio < 1.0 {
            let second = fwd_second_dist[i];
            let denom = if second == 0 {
                f32::EPSILON
            } else {
                second as f32
            };
            if best_dist as f32 / denom >= config.ratio {
                continue;
            }
        }

        matches.push(FeatureMatch {
            query_idx: i,
            train_idx: j,
            distance: best_dist,
        });
    }

    // resolve duplicate train hits, keeping the closest query
    matches.sort_unstable_by_key(|m| (m.train_idx, m.distance));
    matches.dedup_by_key(|m| m.train_idx);
    matches.sort_unstable_by_key(|m| m.query_idx);

    matches
}
