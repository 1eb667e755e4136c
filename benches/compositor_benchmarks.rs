use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgb, RgbImage};
use ndarray::Array2;
use video_bgremove::{compositor, BackgroundSpec, CandidateMask, Compositor, Mask};

const RESOLUTIONS: [(u32, u32); 3] = [(640, 360), (1280, 720), (1920, 1080)];

fn test_frame(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// Soft elliptical mask so both blend branches are exercised
fn test_mask(width: u32, height: u32) -> Mask {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    Mask::from_weights(Array2::from_shape_fn(
        (height as usize, width as usize),
        |(y, x)| {
            let dx = (x as f32 - cx) / cx;
            let dy = (y as f32 - cy) / cy;
            1.5 - (dx * dx + dy * dy).sqrt() * 1.5
        },
    ))
}

fn benchmark_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");
    group.sample_size(20);

    for (width, height) in RESOLUTIONS {
        let frame = test_frame(width, height);
        let mask = test_mask(width, height);
        let label = format!("{width}x{height}");

        let solid = Compositor::new(BackgroundSpec::Solid([0, 255, 0]));
        group.bench_with_input(BenchmarkId::new("solid", &label), &frame, |b, frame| {
            b.iter(|| solid.composite(black_box(frame), black_box(&mask)));
        });

        let transparent = Compositor::new(BackgroundSpec::Transparent);
        group.bench_with_input(BenchmarkId::new("transparent", &label), &frame, |b, frame| {
            b.iter(|| transparent.composite(black_box(frame), black_box(&mask)));
        });
    }

    group.finish();
}

fn benchmark_mask_from_logits(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_from_logits");
    group.sample_size(20);

    for (width, height) in RESOLUTIONS {
        let candidate = CandidateMask {
            logits: Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                (x as f32 - y as f32) / 100.0
            }),
            score: 0.9,
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &candidate,
            |b, candidate| b.iter(|| Mask::from_logits(black_box(&candidate.logits))),
        );
    }

    group.finish();
}

fn benchmark_alpha_only(c: &mut Criterion) {
    let frame = test_frame(1280, 720);
    let mask = test_mask(1280, 720);
    c.bench_function("with_alpha_1280x720", |b| {
        b.iter(|| compositor::with_alpha(black_box(&frame), black_box(&mask)));
    });
}

criterion_group!(
    compositor_benches,
    benchmark_composite,
    benchmark_mask_from_logits,
    benchmark_alpha_only
);
criterion_main!(compositor_benches);
