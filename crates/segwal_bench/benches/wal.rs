//! WAL operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use segwal_bench::{generate_entries, renumber};
use segwal_core::{InMemoryMetaStore, MemorySegmentFiler, Options, Wal};
use std::sync::Arc;
use tempfile::TempDir;

fn memory_wal(dir: &TempDir, segment_size: u32) -> Wal {
    Wal::open(
        dir.path(),
        Options::new()
            .segment_size(segment_size)
            .meta_store(Arc::new(InMemoryMetaStore::new()))
            .segment_filer(Arc::new(MemorySegmentFiler::new())),
    )
    .unwrap()
}

/// Benchmark single entry appends to a file-backed WAL.
fn bench_single_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_append");
    group.sample_size(20);

    for size in [64, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let wal = Wal::open(dir.path(), Options::new()).unwrap();
            let mut entry = generate_entries(1, 1, size);

            b.iter(|| {
                let next = wal.last_index().unwrap() + 1;
                renumber(&mut entry, next);
                wal.store_logs(black_box(&entry)).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark batched appends, which amortize the sync.
fn bench_batch_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_append");
    group.sample_size(20);

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let dir = TempDir::new().unwrap();
                let wal = Wal::open(dir.path(), Options::new()).unwrap();
                let mut batch = generate_entries(1, batch_size, 256);

                b.iter(|| {
                    let next = wal.last_index().unwrap() + 1;
                    renumber(&mut batch, next);
                    wal.store_logs(black_box(&batch)).unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark appends that rotate segments often.
fn bench_rotating_append(c: &mut Criterion) {
    c.bench_function("rotating_append", |b| {
        let dir = TempDir::new().unwrap();
        let wal = memory_wal(&dir, 16 * 1024);
        let mut batch = generate_entries(1, 16, 512);

        b.iter(|| {
            let next = wal.last_index().unwrap() + 1;
            renumber(&mut batch, next);
            wal.store_logs(black_box(&batch)).unwrap();
        });
    });
}

/// Benchmark random reads from a populated WAL.
fn bench_read_populated(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_populated");

    for entry_count in [1000u64, 10000, 100000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(entry_count),
            entry_count,
            |b, &count| {
                let dir = TempDir::new().unwrap();
                let wal = memory_wal(&dir, 1024 * 1024);
                for chunk in generate_entries(1, count as usize, 256).chunks(1000) {
                    wal.store_logs(chunk).unwrap();
                }

                let mut rng = rand::thread_rng();

                b.iter(|| {
                    let index = rng.gen_range(1..=count);
                    let entry = wal.get_log(black_box(index)).unwrap();
                    black_box(entry);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark head truncation, which drops whole segments.
fn bench_truncate_head(c: &mut Criterion) {
    c.bench_function("truncate_head", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let wal = memory_wal(&dir, 16 * 1024);
                for chunk in generate_entries(1, 2000, 256).chunks(100) {
                    wal.store_logs(chunk).unwrap();
                }
                (dir, wal)
            },
            |(_dir, wal)| {
                wal.delete_range(1, black_box(1500)).unwrap();
            },
            criterion::BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    bench_single_append,
    bench_batch_append,
    bench_rotating_append,
    bench_read_populated,
    bench_truncate_head,
);

criterion_main!(benches);
