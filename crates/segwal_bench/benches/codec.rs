//! Entry codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segwal_bench::random_data;
use segwal_codec::{BinaryCodec, CborCodec, Codec, LogEntry};

fn codecs() -> [(&'static str, Box<dyn Codec>); 2] {
    [
        ("binary", Box::new(BinaryCodec) as Box<dyn Codec>),
        ("cbor", Box::new(CborCodec) as Box<dyn Codec>),
    ]
}

/// Benchmark encoding entries of various payload sizes.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for (name, codec) in codecs() {
        for size in [64, 1024, 16384].iter() {
            group.throughput(Throughput::Bytes(*size as u64));
            group.bench_with_input(BenchmarkId::new(name, size), size, |b, &size| {
                let entry = LogEntry::new(42, 7, random_data(size));
                let mut out = Vec::with_capacity(size + 64);
                b.iter(|| {
                    out.clear();
                    codec.encode(black_box(&entry), &mut out).unwrap();
                    black_box(out.len());
                });
            });
        }
    }

    group.finish();
}

/// Benchmark decoding entries of various payload sizes.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (name, codec) in codecs() {
        for size in [64, 1024, 16384].iter() {
            group.throughput(Throughput::Bytes(*size as u64));
            group.bench_with_input(BenchmarkId::new(name, size), size, |b, &size| {
                let entry = LogEntry::new(42, 7, random_data(size));
                let mut encoded = Vec::new();
                codec.encode(&entry, &mut encoded).unwrap();
                b.iter(|| {
                    let decoded = codec.decode(black_box(&encoded)).unwrap();
                    black_box(decoded);
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);

criterion_main!(benches);
