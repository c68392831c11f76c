//! Benchmarks for vcam-video
//!
//! Measures RGB -> semi-planar YUV 4:2:0 throughput at common camera sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vcam_video::{semi_planar_yuv420_to_rgba, to_semi_planar_yuv420, PixelBuffer, PixelFormat};

fn gradient(width: u32, height: u32) -> PixelBuffer {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255]);
        }
    }
    PixelBuffer::new(width, height, PixelFormat::Rgba8, 0, pixels).expect("gradient size")
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("rgba_to_semi_planar");

    for (width, height) in [(640, 480), (1280, 720), (1920, 1080)] {
        let buf = gradient(width, height);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &buf,
            |b, buf| {
                b.iter(|| black_box(to_semi_planar_yuv420(buf)));
            },
        );
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let buf = gradient(1280, 720);
    let yuv = to_semi_planar_yuv420(&buf);

    c.bench_function("semi_planar_to_rgba_720p", |b| {
        b.iter(|| black_box(semi_planar_yuv420_to_rgba(&yuv, 1280, 720, 0)));
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
