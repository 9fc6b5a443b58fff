//! Crash recovery testing for segwal.
//!
//! This module simulates a process dying in the middle of a write and
//! verifies that reopening the WAL yields a clean prefix of what was
//! written.
//!
//! ## Test Strategy
//!
//! 1. Write a batch of entries that are acknowledged
//! 2. Arm a [`CrashSwitch`] so storage dies after N more bytes, leaving a
//!    partial write behind
//! 3. Keep appending until the WAL reports the failure
//! 4. Reopen over the surviving bytes and check the log holds every
//!    acknowledged entry, possibly some of the failed batch, and nothing
//!    else
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segwal_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new(4096);
//! let result = harness.test_torn_write(40, 700);
//! assert!(result.passed, "{result:?}");
//! ```

use crate::fixtures::entry;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use segwal_core::{
    BufferPool, InMemoryMetaStore, LogEntry, Options, SegmentFile, SegmentFiler, SegmentInfo,
    SegmentReader, SegmentWriter, Wal, WalError, WalResult,
};
use segwal_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Shared trigger that makes every [`CrashableBackend`] attached to it fail.
#[derive(Debug)]
pub struct CrashSwitch {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl Default for CrashSwitch {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }
}

impl CrashSwitch {
    /// Creates a disarmed switch.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Crashes once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether the next sync crashes.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the storage has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Total bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }

    fn check(&self, what: &str) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash(what));
        }
        Ok(())
    }
}

/// A storage backend wrapper that can simulate crashes.
///
/// Once crashed, every mutation fails while reads keep working, like a
/// process that died with its files still on disk.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: Arc<CrashSwitch>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>, switch: Arc<CrashSwitch>) -> Self {
        Self { inner, switch }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        self.inner.read_at(offset, buf)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        self.switch.check("write")?;
        let len = data.len() as u64;
        let current = self.switch.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = self.switch.crash_after_bytes.load(Ordering::SeqCst);

        // Check if this write will cross the crash threshold
        if current.saturating_add(len) > threshold {
            let partial_len = threshold.saturating_sub(current) as usize;
            if partial_len > 0 {
                let _ = self.inner.append(&data[..partial_len]);
            }
            return Err(self.switch.crash("partial write"));
        }

        self.inner.append(data)
    }

    fn sync(&self) -> StorageResult<()> {
        self.switch.check("sync")?;
        if self.switch.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.switch.crash("sync"));
        }
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.switch.check("truncate")?;
        self.inner.truncate(new_size)
    }
}

/// In-memory segment filer whose segments share one [`CrashSwitch`].
///
/// After a crash, [`CrashingSegmentFiler::survivor`] hands out a filer over
/// the same bytes with a fresh switch, standing in for the restarted
/// process.
#[derive(Debug, Clone)]
pub struct CrashingSegmentFiler {
    files: Arc<Mutex<BTreeMap<(u64, u64), InMemoryBackend>>>,
    switch: Arc<CrashSwitch>,
    pool: Arc<BufferPool>,
}

impl Default for CrashingSegmentFiler {
    fn default() -> Self {
        Self {
            files: Arc::default(),
            switch: CrashSwitch::new(),
            pool: BufferPool::new(),
        }
    }
}

impl CrashingSegmentFiler {
    /// Creates an empty filer with a disarmed switch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the switch controlling this filer's segments.
    pub fn switch(&self) -> &Arc<CrashSwitch> {
        &self.switch
    }

    /// Returns a filer over the same segments with a fresh switch.
    #[must_use]
    pub fn survivor(&self) -> Self {
        Self {
            files: Arc::clone(&self.files),
            switch: CrashSwitch::new(),
            pool: Arc::clone(&self.pool),
        }
    }

    /// Returns the raw bytes of a segment.
    pub fn backend(&self, base_index: u64, id: u64) -> Option<InMemoryBackend> {
        self.files.lock().get(&(base_index, id)).cloned()
    }

    fn wrap(&self, backend: &InMemoryBackend) -> Box<dyn StorageBackend> {
        Box::new(CrashableBackend::new(
            Box::new(backend.clone()),
            Arc::clone(&self.switch),
        ))
    }

    fn existing(&self, info: &SegmentInfo) -> WalResult<InMemoryBackend> {
        self.backend(info.base_index, info.id).ok_or_else(|| {
            WalError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("segment {} not found", info.id),
            ))
        })
    }
}

impl SegmentFiler for CrashingSegmentFiler {
    fn list(&self) -> WalResult<HashMap<u64, u64>> {
        Ok(self
            .files
            .lock()
            .keys()
            .map(|&(base_index, id)| (id, base_index))
            .collect())
    }

    fn create(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentWriter>> {
        self.switch.check("create")?;
        let backend = {
            let mut files = self.files.lock();
            if files.contains_key(&(info.base_index, info.id)) {
                return Err(WalError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("segment {} exists", info.id),
                )));
            }
            // The file exists from here on, even if the header never lands.
            let backend = InMemoryBackend::new();
            files.insert((info.base_index, info.id), backend.clone());
            backend
        };
        let segment = SegmentFile::create(self.wrap(&backend), info, Arc::clone(&self.pool))?;
        Ok(Arc::new(segment))
    }

    fn recover_tail(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentWriter>> {
        let backend = self.existing(info)?;
        let segment = SegmentFile::recover(self.wrap(&backend), info, Arc::clone(&self.pool))?;
        Ok(Arc::new(segment))
    }

    fn open(&self, info: &SegmentInfo) -> WalResult<Arc<dyn SegmentReader>> {
        let backend = self.existing(info)?;
        let segment =
            SegmentFile::open_sealed(self.wrap(&backend), info, Arc::clone(&self.pool))?;
        Ok(Arc::new(segment))
    }

    fn delete(&self, base_index: u64, id: u64) -> WalResult<()> {
        self.switch.check("delete")?;
        self.files.lock().remove(&(base_index, id));
        Ok(())
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Last index acknowledged before the crash.
    pub acknowledged: u64,
    /// Last index present after recovery.
    pub recovered: u64,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, acknowledged: u64, recovered: u64) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            acknowledged,
            recovered,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, acknowledged: u64, recovered: u64, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            acknowledged,
            recovered,
            error: Some(error.to_string()),
        }
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Segment size used for every WAL the harness opens.
    pub segment_size: u32,
    /// Payload size of generated entries.
    pub entry_size: usize,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new(segment_size: u32) -> Self {
        Self {
            segment_size,
            entry_size: 120,
            results: Vec::new(),
        }
    }

    /// Writes `acknowledged` entries, crashes `crash_after` bytes into the
    /// following writes, and checks what recovery brings back.
    pub fn test_torn_write(&mut self, acknowledged: u64, crash_after: u64) -> CrashRecoveryResult {
        let description = format!("torn write {crash_after} bytes after index {acknowledged}");
        let result = self
            .torn_write(acknowledged, crash_after)
            .unwrap_or_else(|e| CrashRecoveryResult::fail(&description, acknowledged, 0, &e.to_string()));
        self.results.push(result.clone());
        result
    }

    /// Runs `iterations` torn writes at random points chosen from `seed`.
    pub fn test_random_crashes(&mut self, seed: u64, iterations: usize) -> Vec<CrashRecoveryResult> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..iterations)
            .map(|_| {
                let acknowledged = rng.gen_range(0..60);
                let crash_after = rng.gen_range(0..u64::from(self.segment_size) * 2);
                self.test_torn_write(acknowledged, crash_after)
            })
            .collect()
    }

    /// Returns true if every recorded test passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    fn options(&self, meta: &InMemoryMetaStore, filer: &CrashingSegmentFiler) -> Options {
        Options::new()
            .segment_size(self.segment_size)
            .meta_store(Arc::new(meta.clone()))
            .segment_filer(Arc::new(filer.clone()))
    }

    fn torn_write(&self, acknowledged: u64, crash_after: u64) -> WalResult<CrashRecoveryResult> {
        let description = format!("torn write {crash_after} bytes after index {acknowledged}");
        let temp = TempDir::new()?;
        let meta = InMemoryMetaStore::new();
        let filer = CrashingSegmentFiler::new();

        let wal = Wal::open(temp.path(), self.options(&meta, &filer))?;
        let mut written: Vec<LogEntry> = Vec::new();
        let mut next = 1;
        while next <= acknowledged {
            let end = (next + 3).min(acknowledged);
            let batch: Vec<LogEntry> = (next..=end).map(|i| entry(i, self.entry_size)).collect();
            wal.store_logs(&batch)?;
            written.extend(batch);
            next = end + 1;
        }

        filer.switch().crash_after(crash_after);
        let mut attempted = acknowledged;
        let mut acked = acknowledged;
        while attempted < acknowledged + 200 {
            let batch: Vec<LogEntry> = (attempted + 1..=attempted + 4)
                .map(|i| entry(i, self.entry_size))
                .collect();
            attempted += 4;
            written.extend(batch.iter().cloned());
            match wal.store_logs(&batch) {
                Ok(()) => acked = attempted,
                Err(_) => break,
            }
        }
        // The process is gone; whatever close manages is irrelevant.
        let _ = wal.close();
        drop(wal);

        let survivor = filer.survivor();
        let wal = Wal::open(temp.path(), self.options(&meta, &survivor))?;
        let first = wal.first_index()?;
        let last = wal.last_index()?;

        if acked > 0 && first != 1 {
            return Ok(CrashRecoveryResult::fail(
                &description,
                acked,
                last,
                &format!("first index is {first}"),
            ));
        }
        if last < acked || last > attempted {
            return Ok(CrashRecoveryResult::fail(
                &description,
                acked,
                last,
                &format!("recovered last index {last} outside [{acked}, {attempted}]"),
            ));
        }
        for expected in written.iter().take_while(|e| e.index <= last) {
            let got = wal.get_log(expected.index)?;
            if &got != expected {
                return Ok(CrashRecoveryResult::fail(
                    &description,
                    acked,
                    last,
                    &format!("entry {} differs after recovery", expected.index),
                ));
            }
        }
        if last > 0 && !wal.get_log(last + 1).is_err_and(|e| e.is_not_found()) {
            return Ok(CrashRecoveryResult::fail(
                &description,
                acked,
                last,
                "entry past the recovered tail is readable",
            ));
        }

        // The recovered log must accept the next entry.
        wal.store_log(&entry(last + 1, self.entry_size))?;
        wal.close()?;

        Ok(CrashRecoveryResult::pass(&description, acked, last))
    }
}

/// Cuts `bytes` off the end of the file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be resized.
pub fn tear_file(path: &Path, bytes: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    file.set_len(len.saturating_sub(bytes))?;
    file.sync_all()
}

/// Flips every bit of the byte at `offset` in the file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or written.
pub fn flip_byte(path: &Path, offset: u64) -> io::Result<()> {
    let mut bytes = std::fs::read(path)?;
    let at = usize::try_from(offset)
        .ok()
        .filter(|&at| at < bytes.len())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset past end of file"))?;
    bytes[at] ^= 0xFF;
    std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crashable_backend_partial_write() {
        let inner = InMemoryBackend::new();
        let switch = CrashSwitch::new();
        let backend = CrashableBackend::new(Box::new(inner.clone()), Arc::clone(&switch));

        backend.append(b"hello").unwrap();
        switch.crash_after(3);
        assert!(backend.append(b"world").is_err());
        assert!(switch.has_crashed());
        assert_eq!(inner.data(), b"hellowor");

        // Dead storage stays dead.
        assert!(backend.truncate(5).is_err());
        assert!(backend.sync().is_err());
        assert_eq!(backend.size().unwrap(), 8);
    }

    #[test]
    fn test_fail_on_sync() {
        let switch = CrashSwitch::new();
        let backend = CrashableBackend::new(Box::new(InMemoryBackend::new()), Arc::clone(&switch));
        backend.append(b"data").unwrap();
        switch.set_fail_on_sync(true);
        assert!(backend.sync().is_err());
        assert!(switch.has_crashed());
    }

    #[test]
    fn test_survivor_shares_segments() {
        let filer = CrashingSegmentFiler::new();
        let temp = TempDir::new().unwrap();
        let wal = Wal::open(
            temp.path(),
            Options::new()
                .segment_filer(Arc::new(filer.clone()))
                .meta_store(Arc::new(InMemoryMetaStore::new())),
        )
        .unwrap();
        wal.store_log(&entry(1, 16)).unwrap();

        let survivor = filer.survivor();
        assert_eq!(survivor.list().unwrap().len(), 1);
        assert!(!survivor.switch().has_crashed());
    }

    #[test]
    fn test_committed_entries_survive() {
        let mut harness = CrashRecoveryHarness::new(4096);
        let result = harness.test_torn_write(20, 50);
        assert!(result.passed, "{result:?}");
        assert!(result.recovered >= 20);
    }
}
