//! Segment file lifecycle.

use super::file::SegmentFile;
use super::pool::BufferPool;
use super::{SegmentReader, SegmentWriter};
use crate::dir::{parse_segment_file_name, segment_file_name, sync_dir};
use crate::error::{WalError, WalResult};
use crate::meta::SegmentInfo;
use parking_lot::Mutex;
use segwal_storage::{FileBackend, InMemoryBackend};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Creates, recovers, opens and deletes segment files.
pub trait SegmentFiler: Send + Sync + fmt::Debug {
    /// Lists every segment present, as `id → base index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self) -> WalResult<HashMap<u64, u64>>;

    /// Creates a new segment for `info` and makes its directory entry
    /// durable before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment already exists or cannot be written.
    fn create(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentWriter>>;

    /// Reopens the unsealed tail segment for appending, discarding any torn
    /// trailing bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for which [`WalError::is_missing_file`] is true if
    /// the segment does not exist, or a corruption error if its header is
    /// invalid.
    fn recover_tail(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentWriter>>;

    /// Opens a sealed segment read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing or fails validation.
    fn open(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentReader>>;

    /// Removes a segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be removed.
    fn delete(&self, base_index: u64, id: u64) -> WalResult<()>;
}

/// Filer storing each segment as a file in the WAL directory.
#[derive(Debug)]
pub struct FileSegmentFiler {
    dir: PathBuf,
    pool: Arc<BufferPool>,
}

impl FileSegmentFiler {
    /// Creates a filer for `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_pool(dir, BufferPool::new())
    }

    /// Creates a filer for `dir` that reads through `pool`.
    #[must_use]
    pub fn with_pool(dir: impl Into<PathBuf>, pool: Arc<BufferPool>) -> Self {
        Self {
            dir: dir.into(),
            pool,
        }
    }

    /// Returns the WAL directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the segment file for `info`.
    #[must_use]
    pub fn segment_path(&self, base_index: u64, id: u64) -> PathBuf {
        self.dir.join(segment_file_name(base_index, id))
    }
}

impl SegmentFiler for FileSegmentFiler {
    fn list(&self) -> WalResult<HashMap<u64, u64>> {
        let mut segments = HashMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some((base_index, id)) = parse_segment_file_name(name) {
                segments.insert(id, base_index);
            }
        }
        Ok(segments)
    }

    fn create(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentWriter>> {
        let path = self.segment_path(info.base_index, info.id);
        let backend = FileBackend::create(&path)?;
        let segment = SegmentFile::create(Box::new(backend), info, Arc::clone(&self.pool))?;
        sync_dir(&self.dir)?;
        Ok(Arc::new(segment))
    }

    fn recover_tail(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentWriter>> {
        let path = self.segment_path(info.base_index, info.id);
        let backend = FileBackend::open(&path)?;
        let segment = SegmentFile::recover(Box::new(backend), info, Arc::clone(&self.pool))?;
        Ok(Arc::new(segment))
    }

    fn open(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentReader>> {
        let path = self.segment_path(info.base_index, info.id);
        let backend = FileBackend::open_read_only(&path)?;
        let segment = SegmentFile::open_sealed(Box::new(backend), info, Arc::clone(&self.pool))?;
        Ok(Arc::new(segment))
    }

    fn delete(&self, base_index: u64, id: u64) -> WalResult<()> {
        fs::remove_file(self.segment_path(base_index, id))?;
        Ok(())
    }
}

/// Filer keeping segments in memory.
///
/// Clones share the same set of segments, so a test can reopen a WAL over
/// the "files" a previous instance wrote, or reach in and damage them.
#[derive(Debug, Clone)]
pub struct MemorySegmentFiler {
    files: Arc<Mutex<BTreeMap<(u64, u64), InMemoryBackend>>>,
    pool: Arc<BufferPool>,
}

impl Default for MemorySegmentFiler {
    fn default() -> Self {
        Self {
            files: Arc::default(),
            pool: BufferPool::new(),
        }
    }
}

impl MemorySegmentFiler {
    /// Creates an empty filer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the backend of a segment, keyed by `(base_index, id)`.
    #[must_use]
    pub fn backend(&self, base_index: u64, id: u64) -> Option<InMemoryBackend> {
        self.files.lock().get(&(base_index, id)).cloned()
    }

    /// Returns the `(base_index, id)` keys of every segment, in base order.
    #[must_use]
    pub fn keys(&self) -> Vec<(u64, u64)> {
        self.files.lock().keys().copied().collect()
    }

    fn missing(info: &SegmentInfo) -> WalError {
        WalError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("segment {} (base {}) not found", info.id, info.base_index),
        ))
    }
}

impl SegmentFiler for MemorySegmentFiler {
    fn list(&self) -> WalResult<HashMap<u64, u64>> {
        Ok(self
            .files
            .lock()
            .keys()
            .map(|&(base_index, id)| (id, base_index))
            .collect())
    }

    fn create(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentWriter>> {
        let mut files = self.files.lock();
        let key = (info.base_index, info.id);
        if files.contains_key(&key) {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("segment {} (base {}) exists", info.id, info.base_index),
            )));
        }
        let backend = InMemoryBackend::new();
        let segment =
            SegmentFile::create(Box::new(backend.clone()), info, Arc::clone(&self.pool))?;
        files.insert(key, backend);
        Ok(Arc::new(segment))
    }

    fn recover_tail(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentWriter>> {
        let backend = self
            .backend(info.base_index, info.id)
            .ok_or_else(|| Self::missing(info))?;
        let segment = SegmentFile::recover(Box::new(backend), info, Arc::clone(&self.pool))?;
        Ok(Arc::new(segment))
    }

    fn open(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentReader>> {
        let backend = self
            .backend(info.base_index, info.id)
            .ok_or_else(|| Self::missing(info))?;
        let segment = SegmentFile::open_sealed(Box::new(backend), info, Arc::clone(&self.pool))?;
        Ok(Arc::new(segment))
    }

    fn delete(&self, base_index: u64, id: u64) -> WalResult<()> {
        self.files.lock().remove(&(base_index, id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::EncodedEntry;
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn info(id: u64, base: u64) -> SegmentInfo {
        SegmentInfo {
            id,
            base_index: base,
            min_index: base,
            max_index: 0,
            size_limit: 4096,
            codec: 1,
            index_start: 0,
            create_time: SystemTime::now(),
            seal_time: None,
        }
    }

    fn one(index: u64) -> Vec<EncodedEntry> {
        vec![EncodedEntry {
            index,
            data: vec![index as u8; 4],
        }]
    }

    fn exercise(filer: &dyn SegmentFiler) {
        assert!(filer.list().unwrap().is_empty());

        let w = filer.create(&info(1, 1)).unwrap();
        w.append(&one(1)).unwrap();
        let at = w.force_seal().unwrap();
        w.close().unwrap();

        let tail = filer.create(&info(2, 2)).unwrap();
        tail.append(&one(2)).unwrap();
        tail.close().unwrap();

        let listed = filer.list().unwrap();
        assert_eq!(listed.get(&1), Some(&1));
        assert_eq!(listed.get(&2), Some(&2));

        let mut sealed = info(1, 1);
        sealed.index_start = at;
        let r = filer.open(&sealed).unwrap();
        assert_eq!(&r.get_log(1).unwrap()[..], &[1, 1, 1, 1]);

        let recovered = filer.recover_tail(&info(2, 2)).unwrap();
        assert_eq!(recovered.last_index(), 2);

        assert!(filer.recover_tail(&info(9, 9)).unwrap_err().is_missing_file());

        filer.delete(1, 1).unwrap();
        assert!(!filer.list().unwrap().contains_key(&1));
    }

    #[test]
    fn file_filer_lifecycle() {
        let temp = tempdir().unwrap();
        let filer = FileSegmentFiler::new(temp.path());
        exercise(&filer);
        assert!(filer.segment_path(2, 2).exists());
    }

    #[test]
    fn memory_filer_lifecycle() {
        let filer = MemorySegmentFiler::new();
        exercise(&filer);
        assert_eq!(filer.keys(), vec![(2, 2)]);
    }

    #[test]
    fn file_filer_ignores_foreign_files() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("wal-meta.db"), b"x").unwrap();
        fs::write(temp.path().join("notes.txt"), b"x").unwrap();

        let filer = FileSegmentFiler::new(temp.path());
        assert!(filer.list().unwrap().is_empty());
    }

    #[test]
    fn create_refuses_existing_segment() {
        let temp = tempdir().unwrap();
        let filer = FileSegmentFiler::new(temp.path());
        filer.create(&info(1, 1)).unwrap();
        assert!(filer.create(&info(1, 1)).is_err());

        let memory = MemorySegmentFiler::new();
        memory.create(&info(1, 1)).unwrap();
        assert!(memory.create(&info(1, 1)).is_err());
    }
}
