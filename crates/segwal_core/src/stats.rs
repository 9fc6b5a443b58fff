//! WAL metrics.
//!
//! The WAL reports activity through a [`MetricsCollector`]. The default
//! collector, [`AtomicMetrics`], keeps one atomic per named metric and can be
//! read at any time through [`crate::Wal::metrics`]:
//!
//! ```rust,ignore
//! let wal = Wal::open(dir, Options::default())?;
//! wal.store_log(&LogEntry::new(1, 1, b"a".to_vec()))?;
//!
//! let snap = wal.metrics().snapshot();
//! println!("appends: {}", snap.log_appends);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metric names reported by the WAL.
pub mod names {
    /// Encoded bytes appended.
    pub const LOG_ENTRY_BYTES_WRITTEN: &str = "log_entry_bytes_written";
    /// Entries appended.
    pub const LOG_ENTRIES_WRITTEN: &str = "log_entries_written";
    /// Successful `store_logs` calls.
    pub const LOG_APPENDS: &str = "log_appends";
    /// Encoded bytes read.
    pub const LOG_ENTRY_BYTES_READ: &str = "log_entry_bytes_read";
    /// Entries read.
    pub const LOG_ENTRIES_READ: &str = "log_entries_read";
    /// Completed segment rotations.
    pub const SEGMENT_ROTATIONS: &str = "segment_rotations";
    /// Entries removed from the head.
    pub const HEAD_TRUNCATIONS: &str = "head_truncations";
    /// Entries removed from the tail.
    pub const TAIL_TRUNCATIONS: &str = "tail_truncations";
    /// Stable KV reads.
    pub const STABLE_GETS: &str = "stable_gets";
    /// Stable KV writes.
    pub const STABLE_SETS: &str = "stable_sets";
    /// Gauge: seconds between create and seal of the last sealed segment.
    pub const LAST_SEGMENT_AGE_SECONDS: &str = "last_segment_age_seconds";
}

/// Sink for WAL metrics.
///
/// Implementations must be cheap; the WAL calls them on the hot path.
pub trait MetricsCollector: Send + Sync + fmt::Debug {
    /// Adds `by` to the named counter.
    fn increment_counter(&self, name: &str, by: u64);

    /// Sets the named gauge.
    fn set_gauge(&self, name: &str, value: u64);
}

/// Collector that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn increment_counter(&self, _name: &str, _by: u64) {}

    fn set_gauge(&self, _name: &str, _value: u64) {}
}

/// In-process collector backed by atomics.
///
/// All counters can be read while operations are in progress. Unknown
/// metric names are ignored.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    log_entry_bytes_written: AtomicU64,
    log_entries_written: AtomicU64,
    log_appends: AtomicU64,
    log_entry_bytes_read: AtomicU64,
    log_entries_read: AtomicU64,
    segment_rotations: AtomicU64,
    head_truncations: AtomicU64,
    tail_truncations: AtomicU64,
    stable_gets: AtomicU64,
    stable_sets: AtomicU64,
    last_segment_age_seconds: AtomicU64,
}

impl AtomicMetrics {
    /// Creates a collector with every metric at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, name: &str) -> Option<&AtomicU64> {
        let slot = match name {
            names::LOG_ENTRY_BYTES_WRITTEN => &self.log_entry_bytes_written,
            names::LOG_ENTRIES_WRITTEN => &self.log_entries_written,
            names::LOG_APPENDS => &self.log_appends,
            names::LOG_ENTRY_BYTES_READ => &self.log_entry_bytes_read,
            names::LOG_ENTRIES_READ => &self.log_entries_read,
            names::SEGMENT_ROTATIONS => &self.segment_rotations,
            names::HEAD_TRUNCATIONS => &self.head_truncations,
            names::TAIL_TRUNCATIONS => &self.tail_truncations,
            names::STABLE_GETS => &self.stable_gets,
            names::STABLE_SETS => &self.stable_sets,
            _ => return None,
        };
        Some(slot)
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        MetricsSnapshot {
            log_entry_bytes_written: load(&self.log_entry_bytes_written),
            log_entries_written: load(&self.log_entries_written),
            log_appends: load(&self.log_appends),
            log_entry_bytes_read: load(&self.log_entry_bytes_read),
            log_entries_read: load(&self.log_entries_read),
            segment_rotations: load(&self.segment_rotations),
            head_truncations: load(&self.head_truncations),
            tail_truncations: load(&self.tail_truncations),
            stable_gets: load(&self.stable_gets),
            stable_sets: load(&self.stable_sets),
            last_segment_age_seconds: load(&self.last_segment_age_seconds),
        }
    }
}

impl MetricsCollector for AtomicMetrics {
    fn increment_counter(&self, name: &str, by: u64) {
        if let Some(counter) = self.counter(name) {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    fn set_gauge(&self, name: &str, value: u64) {
        if name == names::LAST_SEGMENT_AGE_SECONDS {
            self.last_segment_age_seconds
                .store(value, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of WAL metrics.
///
/// Unlike `AtomicMetrics`, this is a plain struct that can be compared or
/// passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Encoded bytes appended.
    pub log_entry_bytes_written: u64,
    /// Entries appended.
    pub log_entries_written: u64,
    /// Successful append batches.
    pub log_appends: u64,
    /// Encoded bytes read.
    pub log_entry_bytes_read: u64,
    /// Entries read.
    pub log_entries_read: u64,
    /// Completed segment rotations.
    pub segment_rotations: u64,
    /// Entries removed by head truncation.
    pub head_truncations: u64,
    /// Entries removed by tail truncation.
    pub tail_truncations: u64,
    /// Stable KV reads.
    pub stable_gets: u64,
    /// Stable KV writes.
    pub stable_sets: u64,
    /// Age in seconds of the most recently sealed segment.
    pub last_segment_age_seconds: u64,
}
