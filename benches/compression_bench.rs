use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ota_image_builder::digest::Digest;

fn bench_compression(c: &mut Criterion) {
    let data = vec![0u8; 1024 * 1024];

    c.bench_function("zstd_compress_1mb_level9", |b| {
        b.iter(|| zstd::encode_all(black_box(&data[..]), 9).unwrap())
    });
    c.bench_function("zstd_compress_1mb_level12", |b| {
        b.iter(|| zstd::encode_all(black_box(&data[..]), 12).unwrap())
    });
    c.bench_function("sha256_hash_1mb", |b| {
        b.iter(|| Digest::of(black_box(&data)))
    });
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
