//! Test fixtures and WAL helpers.
//!
//! Provides convenience functions for opening WALs in temporary
//! directories and reopening them to exercise recovery.

use segwal_core::{InMemoryMetaStore, LogEntry, MemorySegmentFiler, Options, Wal};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

/// Segment size used by fixtures, small enough that a few dozen entries
/// span several segments.
pub const SMALL_SEGMENT_SIZE: u32 = 4096;

enum Backing {
    File,
    Memory {
        meta: InMemoryMetaStore,
        filer: MemorySegmentFiler,
    },
}

/// A test WAL with automatic cleanup.
pub struct TestWal {
    /// The WAL instance.
    pub wal: Wal,
    segment_size: u32,
    backing: Backing,
    temp_dir: TempDir,
}

impl TestWal {
    /// Creates a file-backed WAL in a fresh temporary directory.
    pub fn file(segment_size: u32) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let wal = Wal::open(temp_dir.path(), Options::new().segment_size(segment_size))
            .expect("Failed to open file WAL");
        Self {
            wal,
            segment_size,
            backing: Backing::File,
            temp_dir,
        }
    }

    /// Creates a WAL whose catalog and segments live in memory.
    ///
    /// The temporary directory is only used as the WAL path and stays empty.
    pub fn memory(segment_size: u32) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let meta = InMemoryMetaStore::new();
        let filer = MemorySegmentFiler::new();
        let wal = Wal::open(temp_dir.path(), memory_options(segment_size, &meta, &filer))
            .expect("Failed to open in-memory WAL");
        Self {
            wal,
            segment_size,
            backing: Backing::Memory { meta, filer },
            temp_dir,
        }
    }

    /// Returns the WAL directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the in-memory segment filer, if this WAL has one.
    pub fn memory_filer(&self) -> Option<&MemorySegmentFiler> {
        match &self.backing {
            Backing::Memory { filer, .. } => Some(filer),
            Backing::File => None,
        }
    }

    /// Closes the WAL and opens it again over the same storage.
    pub fn reopen(self) -> Self {
        let Self {
            wal,
            segment_size,
            backing,
            temp_dir,
        } = self;
        wal.close().expect("Failed to close WAL");
        drop(wal);

        let options = match &backing {
            Backing::File => Options::new().segment_size(segment_size),
            Backing::Memory { meta, filer } => memory_options(segment_size, meta, filer),
        };
        let wal = Wal::open(temp_dir.path(), options).expect("Failed to reopen WAL");
        Self {
            wal,
            segment_size,
            backing,
            temp_dir,
        }
    }

    /// Returns the segment file paths currently in the directory.
    pub fn segment_files(&self) -> Vec<PathBuf> {
        segment_files(self.path())
    }
}

impl std::ops::Deref for TestWal {
    type Target = Wal;

    fn deref(&self) -> &Self::Target {
        &self.wal
    }
}

fn memory_options(segment_size: u32, meta: &InMemoryMetaStore, filer: &MemorySegmentFiler) -> Options {
    Options::new()
        .segment_size(segment_size)
        .meta_store(Arc::new(meta.clone()))
        .segment_filer(Arc::new(filer.clone()))
}

/// Runs a test with a temporary file-backed WAL.
///
/// # Example
///
/// ```rust,ignore
/// use segwal_testkit::with_temp_wal;
///
/// #[test]
/// fn my_test() {
///     with_temp_wal(|wal| {
///         assert_eq!(wal.last_index().unwrap(), 0);
///     });
/// }
/// ```
pub fn with_temp_wal<F, R>(f: F) -> R
where
    F: FnOnce(&Wal) -> R,
{
    let test_wal = TestWal::file(SMALL_SEGMENT_SIZE);
    f(&test_wal.wal)
}

/// Runs a test with a temporary in-memory WAL.
pub fn with_memory_wal<F, R>(f: F) -> R
where
    F: FnOnce(&Wal) -> R,
{
    let test_wal = TestWal::memory(SMALL_SEGMENT_SIZE);
    f(&test_wal.wal)
}

/// Builds a deterministic entry for `index` with a payload of `size` bytes.
///
/// The append time is derived from the index so entries compare equal after
/// a round trip through any codec.
pub fn entry(index: u64, size: usize) -> LogEntry {
    let mut e = LogEntry::new(index, 1 + index / 100, payload(index, size));
    e.append_time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000 + index);
    e
}

/// Builds [`entry`]s for every index in `range`.
pub fn entries(range: RangeInclusive<u64>, size: usize) -> Vec<LogEntry> {
    range.map(|i| entry(i, size)).collect()
}

/// Payload bytes for `index`, recognisable in a hex dump.
pub fn payload(index: u64, size: usize) -> Vec<u8> {
    let seed = index.to_le_bytes();
    (0..size).map(|i| seed[i % 8] ^ (i as u8)).collect()
}

/// Lists the `.wal` files in `dir`, sorted by name.
pub fn segment_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .expect("Failed to read WAL directory")
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
        .collect();
    files.sort();
    files
}

/// Asserts that `wal` holds exactly `expected`, in order, and nothing
/// outside it.
pub fn assert_log_eq(wal: &Wal, expected: &[LogEntry]) {
    let first = wal.first_index().expect("first_index failed");
    let last = wal.last_index().expect("last_index failed");
    match (expected.first(), expected.last()) {
        (Some(head), Some(tail)) => {
            assert_eq!(first, head.index, "first index");
            assert_eq!(last, tail.index, "last index");
        }
        _ => {
            assert_eq!((first, last), (0, 0), "log should be empty");
            return;
        }
    }
    for e in expected {
        let got = wal
            .get_log(e.index)
            .unwrap_or_else(|err| panic!("get_log({}) failed: {err}", e.index));
        assert_eq!(&got, e, "entry {}", e.index);
    }
    if first > 1 {
        assert!(wal.get_log(first - 1).unwrap_err().is_not_found());
    }
    assert!(wal.get_log(last + 1).unwrap_err().is_not_found());
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a file-backed WAL holding `count` entries across several
    /// segments.
    pub fn populated_wal(count: u64) -> (TestWal, Vec<LogEntry>) {
        let test_wal = TestWal::file(SMALL_SEGMENT_SIZE);
        let written = entries(1..=count, 100);
        for chunk in written.chunks(8) {
            test_wal.store_logs(chunk).expect("Failed to store entries");
        }
        (test_wal, written)
    }
}
