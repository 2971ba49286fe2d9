use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use parallax_3d::stereo::{block_match_disparity, depth_from_disparity, StereoConfig};
use parallax_image::{Image, ImageSize};

/// A rectified synthetic pair: the right image is the left one shifted by
/// a constant disparity.
fn rectified_pair(side: usize, disparity: usize) -> (Image<f32, 1>, Image<f32, 1>) {
    let value = |x: usize, y: usize| (x as f32 * 0.41).sin() * (y as f32 * 0.23).sin() * 0.5 + 0.5;
    let mut left = Vec::with_capacity(side * side);
    let mut right = Vec::with_capacity(side * side);
    for y in 0..side {
        for x in 0..side {
            left.push(value(x, y));
            right.push(value(x + disparity, y));
        }
    }
    let size = ImageSize {
        width: side,
        height: side,
    };
    (
        Image::new(size, left).unwrap(),
        Image::new(size, right).unwrap(),
    )
}

fn bench_block_match_disparity(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_match_disparity");
    let config = StereoConfig::default();
    for &side in &[128usize, 256, 512] {
        let (left, right) = rectified_pair(side, 12);
        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, _| {
            b.iter(|| {
                let _ = std::hint::black_box(block_match_disparity(&left, &right, &config));
            });
        });
    }
    group.finish();
}

fn bench_depth_from_disparity(c: &mut Criterion) {
    let (left, right) = rectified_pair(256, 12);
    let disparity = block_match_disparity(&left, &right, &StereoConfig::default()).unwrap();
    c.bench_function("depth_from_disparity", |b| {
        b.iter(|| {
            let _ = std::hint::black_box(depth_from_disparity(&disparity, 0.1, 320.0));
        });
    });
}

criterion_group!(
    benches,
    bench_block_match_disparity,
    bench_depth_from_disparity
);
criterion_main!(benches);
