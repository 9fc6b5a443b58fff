//! Segment catalog and stable key/value storage.
//!
//! The catalog is the authoritative list of segments. Segment files that
//! exist on disk but are not referenced by the committed catalog are orphans
//! and get deleted on open.
//!
//! [`FileMetaStore`] keeps the catalog and the stable KV in one file,
//! `wal-meta.db`, rewritten atomically on every change:
//!
//! ```text
//! ┌──────────┬─────────────┬──────────────┬───────────┬─────────────────┐
//! │ "SGMT"   │ version u16 │ length u32   │ crc32 u32 │ CBOR document   │
//! └──────────┴─────────────┴──────────────┴───────────┴─────────────────┘
//! ```

use crate::dir::{sync_dir, DirLock, META_FILE, META_TEMP};
use crate::error::{WalError, WalResult};
use crate::segment::format::checksum;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Magic bytes identifying a meta file.
pub const META_MAGIC: [u8; 4] = *b"SGMT";

/// Current meta file format version.
pub const META_VERSION: u16 = 1;

/// Size of the meta file header.
const META_HEADER_SIZE: usize = 14;

/// Descriptor of one segment in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Unique, monotonically assigned segment ID.
    pub id: u64,
    /// First index the segment was created to hold.
    pub base_index: u64,
    /// First index still logically present (raised by head truncation).
    pub min_index: u64,
    /// Last index logically present; 0 while the segment is the open tail.
    pub max_index: u64,
    /// Size budget in bytes; the segment seals once it reaches this.
    pub size_limit: u32,
    /// Codec every entry in the segment was encoded with.
    pub codec: u64,
    /// Offset of the trailing index block; 0 while unsealed.
    pub index_start: u64,
    /// When the segment was created.
    pub create_time: SystemTime,
    /// When the segment was sealed; `None` for the tail.
    pub seal_time: Option<SystemTime>,
}

impl SegmentInfo {
    /// Returns true once the segment has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.seal_time.is_some()
    }
}

/// The durable part of the WAL state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    /// ID the next created segment will get.
    pub next_segment_id: u64,
    /// Segments ordered by base index.
    pub segments: Vec<SegmentInfo>,
}

/// Durable storage for the segment catalog and the stable KV.
///
/// Implementations are responsible for their own synchronization: stable
/// KV calls arrive without the WAL write lock and may race with `commit`.
pub trait MetaStore: Send + Sync + fmt::Debug {
    /// Loads the catalog for `dir`, returning an empty state on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or is corrupt.
    fn load(&self, dir: &Path) -> WalResult<PersistentState>;

    /// Atomically replaces the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the new catalog could not be made durable; the
    /// previous catalog is then still in effect.
    fn commit(&self, state: &PersistentState) -> WalResult<()>;

    /// Reads a stable value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not loaded.
    fn get_stable(&self, key: &[u8]) -> WalResult<Option<Vec<u8>>>;

    /// Durably writes a stable value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not loaded or the write fails.
    fn set_stable(&self, key: &[u8], value: &[u8]) -> WalResult<()>;

    /// Releases the underlying handle.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing fails.
    fn close(&self) -> WalResult<()>;
}

/// Everything a meta store persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct MetaDocument {
    state: PersistentState,
    stable: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MetaDocument {
    fn encode(&self) -> WalResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)
            .map_err(|e| WalError::corrupt(format!("failed to encode meta document: {e}")))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| WalError::corrupt("meta document exceeds 4 GiB"))?;

        let mut buf = Vec::with_capacity(META_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&META_MAGIC);
        buf.extend_from_slice(&META_VERSION.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&checksum(&[&payload]).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> WalResult<Self> {
        if bytes.len() < META_HEADER_SIZE {
            return Err(WalError::corrupt("meta file too short"));
        }
        if bytes[0..4] != META_MAGIC {
            return Err(WalError::corrupt("invalid meta file magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != META_VERSION {
            return Err(WalError::corrupt(format!(
                "unsupported meta file version: {version}"
            )));
        }
        let len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let expected = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        let payload = &bytes[META_HEADER_SIZE..];
        if payload.len() != len {
            return Err(WalError::corrupt(format!(
                "meta payload is {} bytes, header says {len}",
                payload.len()
            )));
        }
        let actual = checksum(&[payload]);
        if expected != actual {
            return Err(WalError::ChecksumMismatch { expected, actual });
        }
        ciborium::from_reader(payload)
            .map_err(|e| WalError::corrupt(format!("failed to decode meta document: {e}")))
    }
}

/// An open meta file together with its directory lock.
#[derive(Debug)]
struct OpenMeta {
    dir: PathBuf,
    _lock: DirLock,
    doc: MetaDocument,
}

impl OpenMeta {
    /// Writes `doc` using write-then-rename:
    /// 1. Write to a temporary file
    /// 2. Sync the temporary file
    /// 3. Rename it over `wal-meta.db`
    /// 4. Fsync the directory so the rename is durable
    fn save(&self, doc: &MetaDocument) -> WalResult<()> {
        let data = doc.encode()?;
        let temp_path = self.dir.join(META_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.dir.join(META_FILE))?;
        sync_dir(&self.dir)
    }
}

/// File-backed meta store.
///
/// Holds an exclusive lock on the WAL directory from `load` until `close`,
/// so a second WAL cannot open the same directory.
#[derive(Debug, Default)]
pub struct FileMetaStore {
    inner: Mutex<Option<OpenMeta>>,
}

impl FileMetaStore {
    /// Creates an unloaded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a meta file without locking the directory.
    ///
    /// Intended for offline inspection tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn read_catalog(dir: &Path) -> WalResult<PersistentState> {
        Ok(read_document(dir)?.state)
    }

    fn with_open<T>(&self, f: impl FnOnce(&mut OpenMeta) -> WalResult<T>) -> WalResult<T> {
        let mut inner = self.inner.lock();
        match inner.as_mut() {
            Some(open) => f(open),
            None => Err(WalError::Closed),
        }
    }
}

fn read_document(dir: &Path) -> WalResult<MetaDocument> {
    match fs::read(dir.join(META_FILE)) {
        Ok(data) => MetaDocument::decode(&data),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(MetaDocument::default()),
        Err(e) => Err(e.into()),
    }
}

impl MetaStore for FileMetaStore {
    fn load(&self, dir: &Path) -> WalResult<PersistentState> {
        let mut inner = self.inner.lock();
        if let Some(open) = inner.as_ref() {
            if open.dir == dir {
                return Ok(open.doc.state.clone());
            }
            return Err(WalError::config(format!(
                "meta store already loaded for {}",
                open.dir.display()
            )));
        }

        let lock = DirLock::acquire(dir)?;
        let doc = read_document(dir)?;
        let state = doc.state.clone();
        *inner = Some(OpenMeta {
            dir: dir.to_path_buf(),
            _lock: lock,
            doc,
        });
        Ok(state)
    }

    fn commit(&self, state: &PersistentState) -> WalResult<()> {
        self.with_open(|open| {
            let mut doc = open.doc.clone();
            doc.state = state.clone();
            open.save(&doc)?;
            open.doc = doc;
            Ok(())
        })
    }

    fn get_stable(&self, key: &[u8]) -> WalResult<Option<Vec<u8>>> {
        self.with_open(|open| Ok(open.doc.stable.get(key).cloned()))
    }

    fn set_stable(&self, key: &[u8], value: &[u8]) -> WalResult<()> {
        self.with_open(|open| {
            let mut doc = open.doc.clone();
            doc.stable.insert(key.to_vec(), value.to_vec());
            open.save(&doc)?;
            open.doc = doc;
            Ok(())
        })
    }

    fn close(&self) -> WalResult<()> {
        self.inner.lock().take();
        Ok(())
    }
}

/// Meta store kept entirely in memory.
///
/// Clones share the same contents, so a clone handed to a second
/// [`crate::Wal::open`] observes what the first WAL committed. Useful for
/// tests that reopen a log without touching the filesystem.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMetaStore {
    doc: Arc<Mutex<MetaDocument>>,
}

impl InMemoryMetaStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the committed catalog.
    #[must_use]
    pub fn catalog(&self) -> PersistentState {
        self.doc.lock().state.clone()
    }
}

impl MetaStore for InMemoryMetaStore {
    fn load(&self, _dir: &Path) -> WalResult<PersistentState> {
        Ok(self.doc.lock().state.clone())
    }

    fn commit(&self, state: &PersistentState) -> WalResult<()> {
        self.doc.lock().state = state.clone();
        Ok(())
    }

    fn get_stable(&self, key: &[u8]) -> WalResult<Option<Vec<u8>>> {
        Ok(self.doc.lock().stable.get(key).cloned())
    }

    fn set_stable(&self, key: &[u8], value: &[u8]) -> WalResult<()> {
        self.doc.lock().stable.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn close(&self) -> WalResult<()> {
        Ok(())
    }
}
