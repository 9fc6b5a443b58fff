//! Benchmark utilities.

use rand::Rng;
use segwal_core::LogEntry;

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate entries `start..start + count` with random payloads.
pub fn generate_entries(start: u64, count: usize, payload_size: usize) -> Vec<LogEntry> {
    (start..start + count as u64)
        .map(|i| LogEntry::new(i, 1, random_data(payload_size)))
        .collect()
}

/// Renumbers `entries` to start at `start`.
pub fn renumber(entries: &mut [LogEntry], start: u64) {
    for (e, i) in entries.iter_mut().zip(start..) {
        e.index = i;
    }
}
