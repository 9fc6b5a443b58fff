//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// # Durability
///
/// `sync()` calls `File::sync_all()` so both data and the file length are on
/// disk when it returns. Creating a file does **not** sync its parent
/// directory; callers that need the directory entry to be durable must do it
/// themselves.
///
/// # Thread Safety
///
/// Reads and appends share one file handle behind a lock, so a tail segment
/// can be read while it is being written. `sync()` goes through a second
/// handle to the same file and never takes that lock, so readers are not held
/// up by an fsync.
///
/// # Example
///
/// ```no_run
/// use segwal_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::create(Path::new("data.bin")).unwrap();
/// backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    /// Clone of `file` used only for fsync.
    sync_handle: File,
    size: RwLock<u64>,
    read_only: bool,
}

impl FileBackend {
    /// Creates a new file, failing if one already exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists or cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens an existing file for reading and appending.
    ///
    /// # Errors
    ///
    /// Returns an error (with `io::ErrorKind::NotFound` for a missing file) if
    /// the file cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens an existing file read-only. Appends and truncates fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, true)
    }

    fn from_file(path: &Path, file: File, read_only: bool) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        let sync_handle = file.try_clone()?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            sync_handle,
            size: RwLock::new(size),
            read_only,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let size = *self.size.read();
        let end = offset.saturating_add(buf.len() as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len: buf.len(),
                size,
            });
        }

        if buf.is_empty() {
            return Ok(());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.lock();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn sync(&self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.sync_handle.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let file = self.file.lock();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn create_fails_if_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        FileBackend::create(&path).unwrap();
        assert!(FileBackend::create(&path).is_err());
    }

    #[test]
    fn open_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let err = FileBackend::open(&dir.path().join("missing.bin")).unwrap_err();
        match err {
            StorageError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(&dir.path().join("test.bin")).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);

        let mut buf = [0u8; 11];
        backend.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(&dir.path().join("test.bin")).unwrap();
        backend.append(b"hello").unwrap();

        let mut buf = [0u8; 5];
        let result = backend.read_at(3, &mut buf);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        {
            let backend = FileBackend::create(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        let mut buf = [0u8; 15];
        backend.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"persistent data");
    }

    #[test]
    fn reads_proceed_while_syncing() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(&dir.path().join("test.bin")).unwrap();
        backend.append(b"stable prefix").unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..20 {
                    backend.append(b"+").unwrap();
                    backend.sync().unwrap();
                }
            });
            for _ in 0..200 {
                let mut buf = [0u8; 13];
                backend.read_at(0, &mut buf).unwrap();
                assert_eq!(&buf, b"stable prefix");
            }
        });
        assert_eq!(backend.size().unwrap(), 33);
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");
        FileBackend::create(&path).unwrap();

        let backend = FileBackend::open_read_only(&path).unwrap();
        assert!(matches!(backend.append(b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(backend.truncate(0), Err(StorageError::ReadOnly)));
    }

    #[test]
    fn truncate_then_append_overwrites() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(&dir.path().join("test.bin")).unwrap();
        backend.append(b"hello world").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.append(b"!").unwrap(), 5);

        let mut buf = [0u8; 6];
        backend.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello!");
    }

    #[test]
    fn truncate_past_end_fails() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(&dir.path().join("test.bin")).unwrap();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::TruncatePastEnd { .. })
        ));
    }
}
