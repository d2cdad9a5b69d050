use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use image::{DynamicImage, RgbImage};
use imsimilar::fingerprint::{compute_fingerprint, compute_histogram, compute_phash};
use rand::prelude::*;

fn random_image(width: u32, height: u32) -> DynamicImage {
    let mut rng = rand::rng();
    let mut buf = vec![0u8; (width * height * 3) as usize];
    rng.fill_bytes(&mut buf);
    DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, buf).unwrap())
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("Fingerprint");
    let image = random_image(1920, 1080);

    group.bench_function("phash", |b| b.iter(|| compute_phash(black_box(&image))));
    group.bench_function("histogram", |b| b.iter(|| compute_histogram(black_box(&image))));
    group.bench_function("fingerprint", |b| b.iter(|| compute_fingerprint(black_box(&image))));
    group.finish();
}

criterion_group!(benches, bench_fingerprint);
criterion_main!(benches);
