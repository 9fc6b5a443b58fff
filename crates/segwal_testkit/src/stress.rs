//! Stress tests for segwal.
//!
//! These helpers drive a WAL under heavy load and concurrent access. Every
//! helper starts appending at `last_index() + 1`, so they can be chained on
//! the same WAL.

use crate::fixtures::entry;
use segwal_core::{LogEntry, Wal};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent reader threads.
    pub threads: usize,
    /// Payload size of each entry in bytes.
    pub entry_size: usize,
    /// Entries per `store_logs` call.
    pub batch_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            entry_size: 256,
            batch_size: 16,
        }
    }
}

fn next_batch(wal: &Wal, len: usize, entry_size: usize) -> Vec<LogEntry> {
    let start = wal.last_index().map_or(1, |last| last + 1);
    (start..start + len as u64).map(|i| entry(i, entry_size)).collect()
}

/// Appends `operations` entries one at a time.
pub fn stress_sequential_appends(wal: &Wal, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for _ in 0..config.operations {
        let batch = next_batch(wal, 1, config.entry_size);
        match wal.store_logs(&batch) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Appends `operations` entries in batches of `batch_size`.
pub fn stress_batched_appends(wal: &Wal, config: &StressConfig) -> StressTestResult {
    let batch_size = config.batch_size.max(1);
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    let mut remaining = config.operations;
    while remaining > 0 {
        let len = remaining.min(batch_size);
        let batch = next_batch(wal, len, config.entry_size);
        match wal.store_logs(&batch) {
            Ok(()) => successful += len,
            Err(_) => failed += len,
        }
        remaining -= len;
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Reads every entry in the log `operations` times over, round robin.
pub fn stress_sequential_reads(wal: &Wal, config: &StressConfig) -> StressTestResult {
    let (first, last) = match (wal.first_index(), wal.last_index()) {
        (Ok(first), Ok(last)) if last > 0 => (first, last),
        _ => return StressTestResult::new(0, 0, Duration::ZERO),
    };
    let span = last - first + 1;

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations as u64 {
        match wal.get_log(first + i % span) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Appends while `threads` readers fetch random committed entries.
///
/// Reads count as failed if a committed entry is missing or differs from
/// what was written. Rotation happens underneath whenever the segment size
/// is small enough.
pub fn stress_concurrent_reads(wal: &Wal, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let done = AtomicBool::new(false);
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    thread::scope(|s| {
        for t in 0..config.threads {
            let (successful, failed, done) = (&successful, &failed, &done);
            let entry_size = config.entry_size;
            s.spawn(move || {
                let mut cursor = t as u64;
                for _ in 0..ops_per_thread {
                    let last = match wal.last_index() {
                        Ok(last) if last > 0 => last,
                        _ => {
                            if done.load(Ordering::Acquire) {
                                break;
                            }
                            thread::yield_now();
                            continue;
                        }
                    };
                    let first = wal.first_index().unwrap_or(1);
                    cursor = cursor.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let index = first + (cursor >> 33) % (last - first + 1);
                    match wal.get_log(index) {
                        Ok(got) if got == entry(index, entry_size) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        let writes = StressConfig {
            operations: config.operations / 4,
            ..config.clone()
        };
        let result = stress_batched_appends(wal, &writes);
        failed.fetch_add(result.failed_ops, Ordering::Relaxed);
        done.store(true, Ordering::Release);
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Appends `operations` entries while repeatedly dropping the oldest half
/// of the log.
pub fn stress_append_and_compact(wal: &Wal, config: &StressConfig) -> StressTestResult {
    let batch_size = config.batch_size.max(1);
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    let mut remaining = config.operations;
    while remaining > 0 {
        let len = remaining.min(batch_size);
        let batch = next_batch(wal, len, config.entry_size);
        match wal.store_logs(&batch) {
            Ok(()) => successful += len,
            Err(_) => failed += len,
        }
        remaining -= len;

        if let (Ok(first), Ok(last)) = (wal.first_index(), wal.last_index()) {
            if last - first > (batch_size * 8) as u64 {
                let cut = first + (last - first) / 2;
                match wal.delete_range(first, cut) {
                    Ok(()) => successful += 1,
                    Err(_) => failed += 1,
                }
            }
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}
