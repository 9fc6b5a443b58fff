//! WAL directory management.
//!
//! This module handles the file system layout of a WAL directory:
//!
//! ```text
//! <wal_dir>/
//! ├─ LOCK                                       # Advisory lock for single-writer
//! ├─ wal-meta.db                                # Catalog + stable KV
//! ├─ 00000000000000000001-0000000000000001.wal  # Segment (base index 1, id 1)
//! └─ 00000000000000004097-0000000000000002.wal  # Segment (base index 4097, id 2)
//! ```
//!
//! Segment names sort lexically by base index, which keeps directory
//! listings readable during debugging.

use crate::error::{WalError, WalResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Advisory lock file name.
pub const LOCK_FILE: &str = "LOCK";
/// Meta store file name.
pub const META_FILE: &str = "wal-meta.db";
/// Temporary file for atomic meta writes.
pub const META_TEMP: &str = "wal-meta.db.tmp";
/// Segment file extension.
pub const SEGMENT_EXT: &str = "wal";

/// Returns the file name of a segment.
#[must_use]
pub fn segment_file_name(base_index: u64, id: u64) -> String {
    format!("{base_index:020}-{id:016x}.{SEGMENT_EXT}")
}

/// Parses a segment file name into `(base_index, id)`.
///
/// Returns `None` for anything that is not a segment file.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(".wal")?;
    let (base, id) = stem.split_once('-')?;
    if base.len() != 20 || id.len() != 16 {
        return None;
    }
    if !base.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let base_index = base.parse().ok()?;
    let id = u64::from_str_radix(id, 16).ok()?;
    Some((base_index, id))
}

/// Ensures the WAL directory exists.
///
/// # Errors
///
/// Returns a configuration error if the directory is missing and
/// `create_if_missing` is false, or if the path is not a directory.
pub fn ensure_dir(path: &Path, create_if_missing: bool) -> WalResult<()> {
    if !path.exists() {
        if create_if_missing {
            fs::create_dir_all(path)?;
        } else {
            return Err(WalError::config(format!(
                "WAL directory does not exist: {}",
                path.display()
            )));
        }
    }

    if !path.is_dir() {
        return Err(WalError::config(format!(
            "path is not a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Syncs a directory so that entry creations, renames and deletions are durable.
///
/// On Windows, directory fsync is not supported in the same way as Unix.
/// NTFS journals metadata operations, so the explicit fsync is skipped there.
#[cfg(unix)]
pub fn sync_dir(path: &Path) -> WalResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

/// Syncs a directory so that entry creations, renames and deletions are durable.
#[cfg(not(unix))]
pub fn sync_dir(_path: &Path) -> WalResult<()> {
    Ok(())
}

/// Exclusive advisory lock on a WAL directory.
///
/// The lock is released when the value is dropped (the fs2 lock lives as
/// long as the file handle).
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    _file: File,
}

impl DirLock {
    /// Acquires the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Locked`] if another handle holds the lock.
    pub fn acquire(dir: &Path) -> WalResult<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(WalError::Locked);
        }

        Ok(Self { path, _file: file })
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn segment_names_round_trip() {
        let name = segment_file_name(4097, 0x2a);
        assert_eq!(name, "00000000000000004097-000000000000002a.wal");
        assert_eq!(parse_segment_file_name(&name), Some((4097, 0x2a)));
    }

    #[test]
    fn segment_names_sort_by_base() {
        let a = segment_file_name(9, 7);
        let b = segment_file_name(10, 1);
        assert!(a < b);
    }

    #[test]
    fn foreign_names_are_ignored() {
        assert_eq!(parse_segment_file_name("wal-meta.db"), None);
        assert_eq!(parse_segment_file_name("LOCK"), None);
        assert_eq!(parse_segment_file_name("1-1.wal"), None);
        assert_eq!(
            parse_segment_file_name("0000000000000000000x-0000000000000001.wal"),
            None
        );
    }

    #[test]
    fn ensure_dir_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("new_wal");

        ensure_dir(&path, true).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn ensure_dir_fails_without_create() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("missing");

        let result = ensure_dir(&path, false);
        assert!(matches!(result, Err(WalError::Config { .. })));
    }

    #[test]
    fn lock_prevents_second_acquire() {
        let temp = tempdir().unwrap();

        let _first = DirLock::acquire(temp.path()).unwrap();
        let second = DirLock::acquire(temp.path());
        assert!(matches!(second, Err(WalError::Locked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();

        {
            let lock = DirLock::acquire(temp.path()).unwrap();
            assert!(lock.path().ends_with(LOCK_FILE));
        }

        let _again = DirLock::acquire(temp.path()).unwrap();
    }
}
