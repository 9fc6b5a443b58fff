//! The write-ahead log.
//!
//! A [`Wal`] stores a contiguous, append-only sequence of [`LogEntry`]s in a
//! directory of segment files, plus a small stable key/value store for
//! scalars like the current term.
//!
//! # Concurrency
//!
//! One writer at a time, any number of readers:
//!
//! - `store_logs`, `delete_range` and rotation serialize on the write lock
//! - `get_log`, `first_index` and `last_index` read an immutable state
//!   snapshot and never touch the write lock
//! - Segment rotation runs on a background thread; the next append waits
//!   for it to finish
//!
//! # Example
//!
//! ```rust,ignore
//! use segwal_core::{LogEntry, Options, Wal};
//!
//! let wal = Wal::open("raft/wal", Options::default())?;
//! wal.store_logs(&[
//!     LogEntry::new(1, 1, b"a".to_vec()),
//!     LogEntry::new(2, 1, b"b".to_vec()),
//! ])?;
//! assert_eq!(wal.last_index()?, 2);
//!
//! wal.delete_range(1, 1)?;
//! assert_eq!(wal.first_index()?, 2);
//! wal.close()?;
//! ```

mod append;
mod rotate;
mod truncate;

use crate::config::Options;
use crate::dir::ensure_dir;
use crate::error::{WalError, WalResult};
use crate::meta::{FileMetaStore, MetaStore, SegmentInfo};
use crate::segment::{FileSegmentFiler, SegmentFiler};
use crate::state::{SegmentSlot, SegmentState, State};
use crate::stats::{names, AtomicMetrics, MetricsCollector, MetricsSnapshot};
use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use rotate::{install_new_tail, run_rotation_worker, WriterState};
use segwal_codec::{builtin_codec, Codec, LogEntry, CODEC_BINARY_V1, CODEC_CBOR_V1};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, info_span, warn, Span};

/// Shared by the handle and the rotation worker.
pub(crate) struct WalInner {
    dir: PathBuf,
    closed: AtomicBool,
    /// Codec for new segments.
    codec: Arc<dyn Codec>,
    /// Every codec a segment may have been written with.
    codecs: HashMap<u64, Arc<dyn Codec>>,
    filer: Arc<dyn SegmentFiler>,
    meta: Arc<dyn MetaStore>,
    metrics: AtomicMetrics,
    collector: Option<Arc<dyn MetricsCollector>>,
    span: Span,
    segment_size: u32,
    state: ArcSwap<State>,
    writer: Mutex<WriterState>,
    rotation_done: Condvar,
}

impl WalInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> WalResult<()> {
        if self.is_closed() {
            return Err(WalError::Closed);
        }
        Ok(())
    }

    fn codec_for(&self, id: u64) -> WalResult<&Arc<dyn Codec>> {
        self.codecs
            .get(&id)
            .ok_or_else(|| WalError::config(format!("no codec registered for ID {id}")))
    }

    fn count(&self, name: &str, by: u64) {
        self.metrics.increment_counter(name, by);
        if let Some(collector) = &self.collector {
            collector.increment_counter(name, by);
        }
    }

    fn gauge(&self, name: &str, value: u64) {
        self.metrics.set_gauge(name, value);
        if let Some(collector) = &self.collector {
            collector.set_gauge(name, value);
        }
    }
}

/// A segmented, crash-safe write-ahead log.
///
/// `Wal` is `Send + Sync`; share it behind an `Arc` to read from several
/// threads while one appends.
pub struct Wal {
    inner: Arc<WalInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Opens the WAL in `dir`, recovering whatever a previous run left.
    ///
    /// Recovery opens every sealed segment, repairs a torn tail and deletes
    /// segment files the catalog does not know about.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid, the directory is locked
    /// by another WAL, or a segment fails validation.
    pub fn open(dir: impl AsRef<Path>, options: Options) -> WalResult<Self> {
        let dir = dir.as_ref();
        options.validate()?;
        ensure_dir(dir, options.create_if_missing)?;

        let span = options
            .logger
            .clone()
            .unwrap_or_else(|| info_span!("wal", dir = %dir.display()));
        span.in_scope(|| Self::open_in_span(dir, options, span.clone()))
    }

    fn open_in_span(dir: &Path, options: Options, span: Span) -> WalResult<Self> {
        let meta = options
            .meta_store
            .unwrap_or_else(|| Arc::new(FileMetaStore::new()));
        let filer = options
            .segment_filer
            .unwrap_or_else(|| Arc::new(FileSegmentFiler::new(dir)));

        let mut codecs: HashMap<u64, Arc<dyn Codec>> = HashMap::new();
        for id in [CODEC_BINARY_V1, CODEC_CBOR_V1] {
            if let Some(codec) = builtin_codec(id) {
                codecs.insert(id, codec);
            }
        }
        codecs.insert(options.codec.id(), Arc::clone(&options.codec));

        let recovered = recover_state(
            meta.as_ref(),
            filer.as_ref(),
            &codecs,
            options.segment_size,
            options.codec.id(),
            dir,
        );
        let (state, orphans) = match recovered {
            Ok(r) => r,
            Err(e) => {
                if let Err(close_err) = meta.close() {
                    warn!(error = %close_err, "failed to release meta store after failed open");
                }
                return Err(e);
            }
        };

        for (id, base_index) in orphans {
            warn!(segment_id = id, base_index, "deleting orphaned segment");
            if let Err(e) = filer.delete(base_index, id) {
                error!(segment_id = id, error = %e, "failed to delete orphaned segment");
            }
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let inner = Arc::new(WalInner {
            dir: dir.to_path_buf(),
            closed: AtomicBool::new(false),
            codec: options.codec,
            codecs,
            filer,
            meta,
            metrics: AtomicMetrics::new(),
            collector: options.metrics,
            span,
            segment_size: options.segment_size,
            state: ArcSwap::from_pointee(state),
            writer: Mutex::new(WriterState {
                rotating: false,
                trigger: Some(tx),
            }),
            rotation_done: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("segwal-rotate".into())
            .spawn(move || run_rotation_worker(worker_inner, rx))?;

        let wal = Self {
            inner,
            worker: Mutex::new(Some(worker)),
        };
        {
            let state = wal.inner.state.load();
            info!(
                first_index = state.first_index(),
                last_index = state.last_index(),
                segments = state.segments.len(),
                "WAL opened"
            );
        }
        Ok(wal)
    }

    /// Returns the WAL directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Returns the first index in the log, 0 if empty.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Closed`] after `close`.
    pub fn first_index(&self) -> WalResult<u64> {
        self.inner.check_open()?;
        Ok(self.inner.state.load().first_index())
    }

    /// Returns the last index in the log, 0 if empty.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Closed`] after `close`.
    pub fn last_index(&self) -> WalResult<u64> {
        self.inner.check_open()?;
        Ok(self.inner.state.load().last_index())
    }

    /// Reads the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::NotFound`] if `index` is outside
    /// `[first_index, last_index]`, a corruption error if the stored frame
    /// is damaged, or [`WalError::Closed`] after `close`.
    pub fn get_log(&self, index: u64) -> WalResult<LogEntry> {
        self.inner.check_open()?;
        let state = self.inner.state.load_full();
        let (buf, codec_id) = state.get_log(index)?;
        let entry = self.inner.codec_for(codec_id)?.decode(&buf)?;

        self.inner.count(names::LOG_ENTRIES_READ, 1);
        self.inner.count(names::LOG_ENTRY_BYTES_READ, buf.len() as u64);
        Ok(entry)
    }

    /// Durably stores a stable value.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Closed`] after `close`, or an I/O error.
    pub fn set(&self, key: &[u8], value: &[u8]) -> WalResult<()> {
        self.inner.check_open()?;
        self.inner.meta.set_stable(key, value)?;
        self.inner.count(names::STABLE_SETS, 1);
        Ok(())
    }

    /// Reads a stable value.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Closed`] after `close`, or an I/O error.
    pub fn get(&self, key: &[u8]) -> WalResult<Option<Vec<u8>>> {
        self.inner.check_open()?;
        let value = self.inner.meta.get_stable(key)?;
        self.inner.count(names::STABLE_GETS, 1);
        Ok(value)
    }

    /// Stores a u64 as 8 little-endian bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Wal::set`].
    pub fn set_u64(&self, key: &[u8], value: u64) -> WalResult<()> {
        self.set(key, &value.to_le_bytes())
    }

    /// Reads a u64 stored with [`Wal::set_u64`]. Missing or empty values
    /// read as 0.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::WrongLength`] if the stored value is not 8 bytes.
    pub fn get_u64(&self, key: &[u8]) -> WalResult<u64> {
        match self.get(key)? {
            None => Ok(0),
            Some(bytes) if bytes.is_empty() => Ok(0),
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| WalError::WrongLength { len: bytes.len() })?;
                Ok(u64::from_le_bytes(raw))
            }
        }
    }

    /// Always true: indexes in this log are strictly sequential.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        true
    }

    /// Returns the catalog entries of every live segment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Closed`] after `close`.
    pub fn segments(&self) -> WalResult<Vec<SegmentInfo>> {
        self.inner.check_open()?;
        Ok(self.inner.state.load().persistent().segments)
    }

    /// Returns a snapshot of the WAL's own metrics.
    ///
    /// A collector passed through [`Options::metrics`] receives the same
    /// events in addition.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Closes the WAL.
    ///
    /// Waits for an in-flight append and a queued rotation, stops the
    /// rotation worker and releases the meta store. Segment files stay open until the last
    /// reader holding an older snapshot lets go. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the meta store fails to close.
    pub fn close(&self) -> WalResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = {
            let mut w = self.inner.writer.lock();
            self.inner.await_rotation(&mut w);
            w.trigger = None;
            w.rotating = false;
            self.inner.rotation_done.notify_all();

            let old = self.inner.state.swap(Arc::new(State::empty()));
            let handles = old.handles();
            let span = self.inner.span.clone();
            old.set_finalizer(Box::new(move || {
                for handle in handles {
                    if let Err(e) = handle.close() {
                        warn!(parent: &span, error = %e, "failed to close segment");
                    }
                }
            }));
            drop(old);
            self.inner.meta.close()
        };

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(parent: &self.inner.span, "rotation worker panicked");
            }
        }
        info!(parent: &self.inner.span, "WAL closed");
        result
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(parent: &self.inner.span, error = %e, "failed to close WAL on drop");
        }
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.inner.dir)
            .field("closed", &self.inner.is_closed())
            .field("state", &**self.inner.state.load())
            .finish()
    }
}

/// Rebuilds the in-memory state from the catalog and the segment files.
///
/// Returns the state and the orphaned segments (`id → base index`) to
/// delete.
fn recover_state(
    meta: &dyn MetaStore,
    filer: &dyn SegmentFiler,
    codecs: &HashMap<u64, Arc<dyn Codec>>,
    segment_size: u32,
    codec: u64,
    dir: &Path,
) -> WalResult<(State, HashMap<u64, u64>)> {
    let persisted = meta.load(dir)?;
    let mut orphans = filer.list()?;
    let mut state = State::empty();

    let newest_on_disk = orphans.keys().max().map_or(0, |id| id + 1);
    state.next_segment_id = persisted.next_segment_id.max(newest_on_disk).max(1);

    let count = persisted.segments.len();
    for (i, info) in persisted.segments.into_iter().enumerate() {
        orphans.remove(&info.id);
        if !codecs.contains_key(&info.codec) {
            return Err(WalError::config(format!(
                "segment {} was written with unknown codec {}",
                info.id, info.codec
            )));
        }

        if info.is_sealed() {
            let reader = filer.open(&info)?;
            state.segments.insert(
                info.base_index,
                SegmentState {
                    info,
                    slot: SegmentSlot::sealed(reader),
                },
            );
            continue;
        }

        if i + 1 != count {
            return Err(WalError::corrupt(format!(
                "unsealed segment {} is not the newest segment",
                info.id
            )));
        }
        let writer = match filer.recover_tail(&info) {
            Ok(writer) => writer,
            Err(e) if e.is_missing_file() => {
                debug!(segment_id = info.id, "tail segment file missing, creating it");
                filer.create(&info)?
            }
            Err(e) => return Err(e),
        };
        state.tail = Some(Arc::clone(&writer));
        state.segments.insert(
            info.base_index,
            SegmentState {
                info,
                slot: SegmentSlot::tail(writer),
            },
        );
    }

    if state.tail.is_none() {
        install_new_tail(&mut state, meta, filer, segment_size, codec)?;
    }
    Ok((state, orphans))
}
