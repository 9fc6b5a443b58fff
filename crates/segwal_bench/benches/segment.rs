//! Segment file benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segwal_bench::random_data;
use segwal_core::segment::format::encode_frame;
use segwal_core::{BufferPool, EncodedEntry, SegmentFile, SegmentInfo, SegmentReader, SegmentWriter};
use segwal_storage::InMemoryBackend;
use std::time::SystemTime;

fn info(size_limit: u32) -> SegmentInfo {
    SegmentInfo {
        id: 1,
        base_index: 1,
        min_index: 1,
        max_index: 0,
        size_limit,
        codec: 1,
        index_start: 0,
        create_time: SystemTime::now(),
        seal_time: None,
    }
}

fn encoded(start: u64, count: usize, size: usize) -> Vec<EncodedEntry> {
    (start..start + count as u64)
        .map(|index| EncodedEntry {
            index,
            data: random_data(size),
        })
        .collect()
}

/// Benchmark frame encoding.
fn bench_encode_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");

    for size in [64, 1024, 16384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let payload = random_data(size);
            let mut out = Vec::with_capacity(size + 16);
            b.iter(|| {
                out.clear();
                encode_frame(&mut out, black_box(7), black_box(&payload)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark appending to an in-memory segment.
fn bench_segment_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_append");

    for batch in [1usize, 16, 128].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            b.iter_batched(
                || {
                    let segment = SegmentFile::create(
                        Box::new(InMemoryBackend::new()),
                        &info(u32::MAX),
                        BufferPool::new(),
                    )
                    .unwrap();
                    (segment, encoded(1, batch, 256))
                },
                |(segment, entries)| {
                    segment.append(black_box(&entries)).unwrap();
                    black_box(segment.last_index());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark random reads from a populated segment.
fn bench_segment_read(c: &mut Criterion) {
    c.bench_function("segment_read", |b| {
        let segment = SegmentFile::create(
            Box::new(InMemoryBackend::new()),
            &info(u32::MAX),
            BufferPool::new(),
        )
        .unwrap();
        segment.append(&encoded(1, 4096, 256)).unwrap();

        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7919) % 4096;
            let buf = segment.get_log(black_box(i + 1)).unwrap();
            black_box(buf.len());
        });
    });
}

/// Benchmark tail recovery scanning.
fn bench_recover(c: &mut Criterion) {
    let mut group = c.benchmark_group("recover_tail");

    for count in [100usize, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let backend = InMemoryBackend::new();
            let segment =
                SegmentFile::create(Box::new(backend.clone()), &info(u32::MAX), BufferPool::new())
                    .unwrap();
            segment.append(&encoded(1, count, 128)).unwrap();
            let data = backend.data();

            b.iter(|| {
                let copy = InMemoryBackend::with_data(data.clone());
                let recovered =
                    SegmentFile::recover(Box::new(copy), &info(u32::MAX), BufferPool::new())
                        .unwrap();
                black_box(recovered.last_index());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_frame,
    bench_segment_append,
    bench_segment_read,
    bench_recover,
);

criterion_main!(benches);
