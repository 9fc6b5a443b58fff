//! Property-based test generators using proptest.
//!
//! Provides strategies for generating log entries and operation sequences,
//! plus [`LogModel`], a reference model the WAL is checked against.

use crate::fixtures::entry;
use proptest::prelude::*;
use segwal_core::{LogEntry, LogType, Wal, WalResult};
use std::collections::BTreeMap;

/// Strategy for generating entry payloads.
pub fn entry_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for generating log types, biased towards commands.
pub fn log_type_strategy() -> impl Strategy<Value = LogType> {
    prop_oneof![
        6 => Just(LogType::COMMAND),
        1 => Just(LogType::NOOP),
        1 => Just(LogType::BARRIER),
        1 => Just(LogType::CONFIGURATION),
        1 => any::<u8>().prop_map(LogType::from_byte),
    ]
}

/// Strategy for generating a single entry at `index`.
pub fn entry_strategy(index: u64) -> impl Strategy<Value = LogEntry> {
    (
        any::<u64>(),
        log_type_strategy(),
        entry_data_strategy(),
        prop::collection::vec(any::<u8>(), 0..16),
    )
        .prop_map(move |(epoch, log_type, data, extensions)| {
            let mut e = entry(index, 0);
            e.epoch = epoch;
            e.log_type = log_type;
            e.data = data;
            e.extensions = extensions;
            e
        })
}

/// An operation against the WAL.
#[derive(Debug, Clone)]
pub enum WalOp {
    /// Append `count` entries of `size` bytes after the current last index.
    Append {
        /// Number of entries
        count: u64,
        /// Payload size
        size: usize,
    },
    /// Delete `count` entries from the head.
    DeleteHead {
        /// Number of entries
        count: u64,
    },
    /// Delete `count` entries from the tail.
    DeleteTail {
        /// Number of entries
        count: u64,
    },
    /// Delete everything.
    DeleteAll,
    /// Close and reopen the WAL.
    Reopen,
}

/// Strategy for generating WAL operations.
pub fn wal_op_strategy() -> impl Strategy<Value = WalOp> {
    prop_oneof![
        6 => (1u64..24, 0usize..400).prop_map(|(count, size)| WalOp::Append { count, size }),
        2 => (1u64..16).prop_map(|count| WalOp::DeleteHead { count }),
        2 => (1u64..16).prop_map(|count| WalOp::DeleteTail { count }),
        1 => Just(WalOp::DeleteAll),
        1 => Just(WalOp::Reopen),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn wal_op_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<WalOp>> {
    prop::collection::vec(wal_op_strategy(), min_ops..max_ops)
}

/// Reference model of the log.
///
/// Tracks which entries a correct WAL holds after a sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct LogModel {
    entries: BTreeMap<u64, LogEntry>,
    next_index: u64,
}

impl LogModel {
    /// Creates an empty model whose first append lands at index 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_index: 1,
        }
    }

    /// Returns the first index, or 0 if empty.
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.entries.keys().next().copied().unwrap_or(0)
    }

    /// Returns the last index, or 0 if empty.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    /// Returns every entry in index order.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.values().cloned().collect()
    }

    /// Index the next append must start at.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Records an accepted append.
    pub fn append(&mut self, batch: &[LogEntry]) {
        for e in batch {
            self.entries.insert(e.index, e.clone());
        }
        if let Some(last) = batch.last() {
            self.next_index = last.index + 1;
        }
    }

    /// Records an accepted `delete_range(min, max)` that removes a prefix or
    /// suffix.
    pub fn delete_range(&mut self, min: u64, max: u64) {
        let (first, last) = (self.first_index(), self.last_index());
        if min > max || self.entries.is_empty() || max < first || min > last {
            return;
        }
        if min <= first && max >= last {
            // Full purge: the next append continues after the old last.
            self.entries.clear();
            self.next_index = last + 1;
            return;
        }
        self.entries.retain(|&i, _| i < min || i > max);
        self.next_index = self.last_index() + 1;
    }

    /// Applies `op` to both the model and `wal`.
    ///
    /// Reopen is the caller's business since it replaces the WAL; this
    /// returns `Ok(false)` for it.
    ///
    /// # Errors
    ///
    /// Returns the WAL's error if it rejects an operation the model accepts.
    pub fn apply(&mut self, wal: &Wal, op: &WalOp) -> WalResult<bool> {
        match *op {
            WalOp::Append { count, size } => {
                let start = self.next_index;
                let batch: Vec<LogEntry> = (start..start + count).map(|i| entry(i, size)).collect();
                wal.store_logs(&batch)?;
                self.append(&batch);
            }
            WalOp::DeleteHead { count } => {
                if !self.entries.is_empty() {
                    let first = self.first_index();
                    let max = (first + count - 1).min(self.last_index().saturating_sub(1));
                    if max >= first {
                        wal.delete_range(first, max)?;
                        self.delete_range(first, max);
                    }
                }
            }
            WalOp::DeleteTail { count } => {
                if !self.entries.is_empty() {
                    let last = self.last_index();
                    let min = last.saturating_sub(count - 1).max(self.first_index() + 1);
                    if min <= last {
                        wal.delete_range(min, last)?;
                        self.delete_range(min, last);
                    }
                }
            }
            WalOp::DeleteAll => {
                if !self.entries.is_empty() {
                    let (first, last) = (self.first_index(), self.last_index());
                    wal.delete_range(first, last)?;
                    self.delete_range(first, last);
                }
            }
            WalOp::Reopen => return Ok(false),
        }
        Ok(true)
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 512,
            max_shrink_iters: 5000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
