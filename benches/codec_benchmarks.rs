//! Codec benchmarks (encode/decode throughput per compression kind)
//!
//! Toyota Way: Genchi Genbutsu (measure, don't guess)
//!
//! Run with: cargo bench --bench codec_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use trueno_cache::{CodecRegistry, Compression, Tensor};

const SMALL_SIZE: usize = 4_096; // 16 KiB of f32
const LARGE_SIZE: usize = 1_048_576; // 4 MiB of f32

fn embedding_like(n: usize) -> Tensor {
    Tensor::from_vec((0..n).map(|i| ((i as f32) * 0.013).sin()).collect())
}

/// Benchmark encode for every registered codec
fn bench_encode(c: &mut Criterion) {
    let registry = CodecRegistry::new();
    let mut group = c.benchmark_group("codec_encode");

    for size in [SMALL_SIZE, LARGE_SIZE] {
        let tensor = embedding_like(size);
        group.throughput(Throughput::Bytes((size * 4) as u64));
        for kind in registry.kinds() {
            group.bench_with_input(BenchmarkId::new(kind.as_str(), size), &tensor, |b, t| {
                b.iter(|| registry.encode(kind, black_box(t)));
            });
        }
    }

    group.finish();
}

/// Benchmark decode for every registered codec
fn bench_decode(c: &mut Criterion) {
    let registry = CodecRegistry::new();
    let mut group = c.benchmark_group("codec_decode");

    for size in [SMALL_SIZE, LARGE_SIZE] {
        let tensor = embedding_like(size);
        group.throughput(Throughput::Bytes((size * 4) as u64));
        for kind in registry.kinds() {
            let encoded = registry.encode(kind, &tensor);
            group.bench_with_input(
                BenchmarkId::new(kind.as_str(), size),
                &encoded.bytes,
                |b, bytes| {
                    b.iter(|| {
                        registry
                            .decode(
                                encoded.compression,
                                black_box(bytes),
                                tensor.shape(),
                                tensor.dtype(),
                            )
                            .unwrap()
                    });
                },
            );
        }
    }

    group.finish();
}

/// Compression ratio is reported once per kind; criterion measures the int8 hot path
fn bench_int8_vs_identity(c: &mut Criterion) {
    let registry = CodecRegistry::new();
    let tensor = embedding_like(LARGE_SIZE);
    for kind in [Compression::Identity, Compression::Int8] {
        let encoded = registry.encode(kind, &tensor);
        println!(
            "{kind}: {} -> {} bytes",
            tensor.len() * 4,
            encoded.bytes.len()
        );
    }

    c.bench_function("int8_round_trip_4mib", |b| {
        b.iter(|| {
            let encoded = registry.encode(Compression::Int8, black_box(&tensor));
            registry
                .decode(
                    Compression::Int8,
                    &encoded.bytes,
                    tensor.shape(),
                    tensor.dtype(),
                )
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_int8_vs_identity);
criterion_main!(benches);
