use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use imsimilar::hamming::{hamming_256, hamming_distance, hamming_naive};
use rand::prelude::*;

fn bench_hamming(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hamming");
    let mut rng = rand::rng();
    let mut src = [0u8; 32];
    let mut dst = vec![0u8; 8 << 20];
    rng.fill_bytes(&mut src);
    rng.fill_bytes(&mut dst);
    let (chunks, _) = dst.as_chunks::<32>();

    group.throughput(Throughput::Bytes(dst.len() as u64));
    group.bench_function("hamming_naive", |b| {
        b.iter(|| chunks.iter().map(|chunk| hamming_naive(&src, black_box(chunk))).sum::<u32>());
    });
    group.bench_function("hamming_256", |b| {
        b.iter(|| chunks.iter().map(|chunk| hamming_256(&src, chunk)).sum::<u32>());
    });
    group.finish();
}

fn bench_hex_distance(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hex Hamming");
    let mut rng = rand::rng();
    // 10000 条记录，与一个中等规模的图库相当
    let hashes = (0..10000)
        .map(|_| {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        })
        .collect::<Vec<_>>();
    let query = hashes[0].clone();

    group.throughput(Throughput::Elements(hashes.len() as u64));
    group.bench_function("hamming_distance", |b| {
        b.iter(|| {
            hashes
                .iter()
                .map(|h| hamming_distance(Some(&query), Some(black_box(h))))
                .sum::<u32>()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_hamming, bench_hex_distance);
criterion_main!(benches);
