use parallax_image::Image;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::detector::KeyPoint;

/// Number of bytes per descriptor (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

/// Half width of the sampling patch.
const PATCH_RADIUS: i64 = 15;

/// Seed for the sampling pattern so descriptors are comparable across runs.
const PATTERN_SEED: u64 = 0x5143;

/// One intensity comparison: two offsets inside the patch.
type TestPair = ([i64; 2], [i64; 2]);

/// The fixed BRIEF-style sampling pattern, 8 comparisons per byte.
fn sampling_pattern() -> Vec<TestPair> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    (0..DESCRIPTOR_BYTES * 8)
        .map(|_| {
            (
                [
                    rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                ],
                [
                    rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                ],
            )
        })
        .collect()
}

/// Compute binary descriptors for the given keypoints.
///
/// Each descriptor bit is an intensity comparison between two fixed offsets
/// of a 31x31 patch of the box-smoothed image. Keypoints whose patch falls
/// outside the image are dropped; the returned keypoints align one-to-one
/// with the returned descriptors.
pub fn compute_descriptors(
    gray: &Image<f32, 1>,
    keypoints: Vec<KeyPoint>,
) -> (Vec<KeyPoint>, Vec<[u8; DESCRIPTOR_BYTES]>) {
    let width = gray.width() as i64;
    let height = gray.height() as i64;
    let smoothed = box_blur3(gray);
    let pattern = sampling_pattern();

    let kept: Vec<KeyPoint> = keypoints
        .into_iter()
        .filter(|kp| {
            let x = kp.x.round() as i64;
            let y = kp.y.round() as i64;
            x - PATCH_RADIUS >= 0
                && y - PATCH_RADIUS >= 0
                && x + PATCH_RADIUS < width
                && y + PATCH_RADIUS < height
        })
        .collect();

    let descriptors: Vec<[u8; DESCRIPTOR_BYTES]> = kept
        .par_iter()
        .map(|kp| {
            let cx = kp.x.round() as i64;
            let cy = kp.y.round() as i64;
            let mut desc = [0u8; DESCRIPTOR_BYTES];
            for (i, (p, q)) in pattern.iter().enumerate() {
                let a = smoothed[((cy + p[1]) * width + cx + p[0]) as usize];
                let b = smoothed[((cy + q[1]) * width + cx + q[0]) as usize];
                if a > b {
                    desc[i / 8] |= 1 << (i % 8);
                }
            }
            desc
        })
        .collect();

    (kept, descriptors)
}

/// 3x3 box blur; borders keep the source value.
fn box_blur3(gray: &Image<f32, 1>) -> Vec<f32> {
    let width = gray.width();
    let height = gray.height();
    let src = gray.as_slice();
    let mut dst = src.to_vec();

    dst.par_chunks_exact_mut(width)
        .enumerate()
        .for_each(|(y, dst_row)| {
            if y == 0 || y == height - 1 {
                return;
            }
            for (x, out) in dst_row.iter_mut().enumerate().take(width - 1).skip(1) {
                let mut sum = 0.0f32;
                for dy in 0..3 {
                    let row = &src[(y + dy - 1) * width..(y + dy) * width];
                    sum += row[x - 1] + row[x] + row[x + 1];
                }
                *out = sum / 9.0;
            }
        });

    dst
}
