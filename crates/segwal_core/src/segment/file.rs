//! Segment writer and reader over a storage backend.

use super::format::{
    decode_index_block, encode_frame, encode_index_block, scan_frames, FrameHeader, ScanStop,
    SegmentHeader, FRAME_HEADER_SIZE, HEADER_SIZE,
};
use super::pool::{BufferPool, PooledBuffer};
use super::{EncodedEntry, SegmentReader, SegmentWriter};
use crate::error::{WalError, WalResult};
use crate::meta::SegmentInfo;
use parking_lot::{Mutex, RwLock};
use segwal_storage::StorageBackend;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What readers may see: only frames below `size` are ever read.
struct Inner {
    /// `None` once closed.
    backend: Option<Arc<dyn StorageBackend>>,
    /// `offsets[i]` is the frame offset of `base_index + i`.
    offsets: Vec<u64>,
    /// Durable file size.
    size: u64,
    /// Index block offset once sealed.
    index_start: Option<u64>,
}

/// A single segment file.
///
/// The same value serves as writer while the segment is the tail and as
/// reader once it has sealed, so snapshots taken before and after a
/// rotation share one open file.
///
/// Appends write and sync with only `write_lock` held, then publish the new
/// offsets under a brief `inner` write lock. Reads therefore never wait for
/// an fsync.
pub struct SegmentFile {
    header: SegmentHeader,
    size_limit: u64,
    pool: Arc<BufferPool>,
    last_index: AtomicU64,
    write_lock: Mutex<()>,
    inner: RwLock<Inner>,
}

/// Writer's view of the segment, taken under `write_lock`.
struct Pending {
    backend: Arc<dyn StorageBackend>,
    next_index: u64,
    size: u64,
}

impl SegmentFile {
    fn from_parts(
        info: &SegmentInfo,
        backend: Box<dyn StorageBackend>,
        offsets: Vec<u64>,
        size: u64,
        index_start: Option<u64>,
        pool: Arc<BufferPool>,
    ) -> Self {
        let last_index = if offsets.is_empty() {
            0
        } else {
            info.base_index + offsets.len() as u64 - 1
        };
        Self {
            header: header_for(info),
            size_limit: u64::from(info.size_limit),
            pool,
            last_index: AtomicU64::new(last_index),
            write_lock: Mutex::new(()),
            inner: RwLock::new(Inner {
                backend: Some(Arc::from(backend)),
                offsets,
                size,
                index_start,
            }),
        }
    }

    /// Initializes a new segment on an empty backend.
    ///
    /// Writes and syncs the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is not empty or the write fails.
    pub fn create(
        backend: Box<dyn StorageBackend>,
        info: &SegmentInfo,
        pool: Arc<BufferPool>,
    ) -> WalResult<Self> {
        let existing = backend.size()?;
        if existing != 0 {
            return Err(WalError::corrupt(format!(
                "segment {} already holds {existing} bytes",
                info.id
            )));
        }
        backend.append(&header_for(info).encode())?;
        backend.sync()?;
        Ok(Self::from_parts(
            info,
            backend,
            Vec::new(),
            HEADER_SIZE as u64,
            None,
            pool,
        ))
    }

    /// Reopens the tail segment after a restart.
    ///
    /// Scans frames forward from the header and stops at the first frame
    /// that is truncated, fails its checksum, breaks the index sequence or
    /// is an index block left by an interrupted seal. Everything from that
    /// point on is truncated away.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the header is invalid or does not match
    /// the descriptor, or an I/O error.
    pub fn recover(
        backend: Box<dyn StorageBackend>,
        info: &SegmentInfo,
        pool: Arc<BufferPool>,
    ) -> WalResult<Self> {
        let size = backend.size()?;
        if size < HEADER_SIZE as u64 {
            // Crashed while the header was being written.
            warn!(
                segment_id = info.id,
                size, "segment header incomplete, reinitializing"
            );
            backend.truncate(0)?;
            return Self::create(backend, info, pool);
        }
        validate_header(backend.as_ref(), info)?;

        let scan = scan_frames(backend.as_ref(), info.base_index, |_, _, _| {})?;
        let pos = scan.end;
        if pos < size {
            if scan.stop == ScanStop::IndexBlock {
                debug!(
                    segment_id = info.id,
                    offset = pos,
                    "removing index block from interrupted seal"
                );
            } else {
                warn!(
                    segment_id = info.id,
                    offset = pos,
                    dropped_bytes = size - pos,
                    reason = %scan.stop,
                    "truncating torn tail"
                );
            }
            backend.truncate(pos)?;
        }
        let offsets = scan.offsets;

        debug!(
            segment_id = info.id,
            entries = offsets.len(),
            "recovered tail segment"
        );
        Ok(Self::from_parts(info, backend, offsets, pos, None, pool))
    }

    /// Opens a sealed segment for reading.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the header or index block is invalid.
    pub fn open_sealed(
        backend: Box<dyn StorageBackend>,
        info: &SegmentInfo,
        pool: Arc<BufferPool>,
    ) -> WalResult<Self> {
        validate_header(backend.as_ref(), info)?;

        let size = backend.size()?;
        if info.index_start < HEADER_SIZE as u64 || info.index_start >= size {
            return Err(WalError::corrupt(format!(
                "segment {} index block offset {} outside file of {size} bytes",
                info.id, info.index_start
            )));
        }
        let block_len = usize::try_from(size - info.index_start)
            .map_err(|_| WalError::corrupt("index block too large"))?;
        let mut block = vec![0u8; block_len];
        backend.read_at(info.index_start, &mut block)?;
        let offsets = decode_index_block(&block, info.base_index, info.index_start)?;

        Ok(Self::from_parts(
            info,
            backend,
            offsets,
            size,
            Some(info.index_start),
            pool,
        ))
    }

    /// Returns the segment ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.header.segment_id
    }

    /// Returns the base index.
    #[must_use]
    pub fn base_index(&self) -> u64 {
        self.header.base_index
    }

    /// Returns the number of entries physically present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().offsets.len()
    }

    /// Returns true if the segment holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current file size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.read().size
    }

    /// Snapshot of the writable end. Call with `write_lock` held.
    fn pending(&self) -> WalResult<Pending> {
        let inner = self.inner.read();
        if inner.index_start.is_some() {
            return Err(WalError::Sealed);
        }
        let backend = inner.backend.clone().ok_or(WalError::Closed)?;
        Ok(Pending {
            backend,
            next_index: self.header.base_index + inner.offsets.len() as u64,
            size: inner.size,
        })
    }

    /// Appends `bytes` at `at` and syncs, rolling back on failure.
    fn write_durable(backend: &dyn StorageBackend, bytes: &[u8], at: u64) -> WalResult<()> {
        if let Err(e) = backend.append(bytes).and_then(|_| backend.sync()) {
            rollback(backend, at);
            return Err(e.into());
        }
        Ok(())
    }
}

fn header_for(info: &SegmentInfo) -> SegmentHeader {
    SegmentHeader {
        segment_id: info.id,
        base_index: info.base_index,
        codec_id: info.codec,
    }
}

fn validate_header(backend: &dyn StorageBackend, info: &SegmentInfo) -> WalResult<()> {
    let mut bytes = [0u8; HEADER_SIZE];
    backend.read_at(0, &mut bytes)?;
    let header = SegmentHeader::decode(&bytes)?;
    if header != header_for(info) {
        return Err(WalError::corrupt(format!(
            "segment header {header:?} does not match catalog entry (id {}, base {}, codec {})",
            info.id, info.base_index, info.codec
        )));
    }
    Ok(())
}

/// Drops a partially written batch so the file ends at the last good frame.
fn rollback(backend: &dyn StorageBackend, size: u64) {
    if let Err(e) = backend.truncate(size) {
        warn!(error = %e, size, "failed to roll back partial segment write");
    }
}

impl SegmentReader for SegmentFile {
    fn get_log(&self, index: u64) -> WalResult<PooledBuffer> {
        if index < self.header.base_index {
            return Err(WalError::NotFound);
        }
        let slot = usize::try_from(index - self.header.base_index)
            .map_err(|_| WalError::NotFound)?;
        let (backend, offset) = {
            let inner = self.inner.read();
            let backend = inner.backend.clone().ok_or(WalError::Closed)?;
            (backend, *inner.offsets.get(slot).ok_or(WalError::NotFound)?)
        };

        let mut head = [0u8; FRAME_HEADER_SIZE];
        backend.read_at(offset, &mut head)?;
        let frame = FrameHeader::parse(&head);
        if frame.is_index_block() || frame.index != index {
            return Err(WalError::corrupt(format!(
                "frame at offset {offset} in segment {} does not hold index {index}",
                self.header.segment_id
            )));
        }
        let mut buf = self.pool.get(frame.len as usize);
        backend.read_at(offset + FRAME_HEADER_SIZE as u64, &mut buf)?;
        frame.verify(&buf)?;
        Ok(buf)
    }

    fn close(&self) -> WalResult<()> {
        self.inner.write().backend = None;
        Ok(())
    }
}

impl SegmentWriter for SegmentFile {
    fn append(&self, entries: &[EncodedEntry]) -> WalResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _writing = self.write_lock.lock();
        let Pending {
            backend,
            mut next_index,
            size,
        } = self.pending()?;

        let mut buf = Vec::new();
        let mut new_offsets = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.index != next_index {
                return Err(WalError::NonMonotonic {
                    attempted: entry.index,
                    last: next_index.saturating_sub(1),
                });
            }
            new_offsets.push(size + buf.len() as u64);
            encode_frame(&mut buf, entry.index, &entry.data)?;
            next_index += 1;
        }

        let frames_end = size + buf.len() as u64;
        let seal = frames_end >= self.size_limit;
        if seal {
            let mut all = self.inner.read().offsets.clone();
            all.extend_from_slice(&new_offsets);
            buf.extend_from_slice(&encode_index_block(self.header.base_index, &all));
        }

        Self::write_durable(backend.as_ref(), &buf, size)?;

        {
            let mut inner = self.inner.write();
            inner.offsets.extend_from_slice(&new_offsets);
            inner.size = size + buf.len() as u64;
            if seal {
                inner.index_start = Some(frames_end);
            }
        }
        if seal {
            debug!(
                segment_id = self.header.segment_id,
                index_start = frames_end,
                "segment reached size limit and sealed"
            );
        }
        self.last_index.store(next_index - 1, Ordering::Release);
        Ok(())
    }

    fn sealed(&self) -> Option<u64> {
        self.inner.read().index_start
    }

    fn force_seal(&self) -> WalResult<u64> {
        let _writing = self.write_lock.lock();
        if let Some(at) = self.inner.read().index_start {
            return Ok(at);
        }
        let Pending { backend, size, .. } = self.pending()?;

        let block = encode_index_block(self.header.base_index, &self.inner.read().offsets);
        Self::write_durable(backend.as_ref(), &block, size)?;

        let mut inner = self.inner.write();
        inner.size = size + block.len() as u64;
        inner.index_start = Some(size);
        Ok(size)
    }

    fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SegmentFile")
            .field("id", &self.header.segment_id)
            .field("base_index", &self.header.base_index)
            .field("codec_id", &self.header.codec_id)
            .field("entries", &inner.offsets.len())
            .field("size", &inner.size)
            .field("index_start", &inner.index_start)
            .field("closed", &inner.backend.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segwal_storage::{InMemoryBackend, StorageResult};
    use std::sync::mpsc;
    use std::time::SystemTime;

    fn info(base: u64, size_limit: u32) -> SegmentInfo {
        SegmentInfo {
            id: 1,
            base_index: base,
            min_index: base,
            max_index: 0,
            size_limit,
            codec: 1,
            index_start: 0,
            create_time: SystemTime::now(),
            seal_time: None,
        }
    }

    fn entries(range: std::ops::RangeInclusive<u64>) -> Vec<EncodedEntry> {
        range
            .map(|index| EncodedEntry {
                index,
                data: format!("entry-{index}").into_bytes(),
            })
            .collect()
    }

    fn new_segment(base: u64, size_limit: u32) -> (InMemoryBackend, SegmentFile) {
        let backend = InMemoryBackend::new();
        let seg = SegmentFile::create(
            Box::new(backend.clone()),
            &info(base, size_limit),
            BufferPool::new(),
        )
        .unwrap();
        (backend, seg)
    }

    type Gate = Arc<Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>>;

    /// Backend whose next `sync` blocks once armed, until released.
    struct GatedBackend {
        inner: InMemoryBackend,
        gate: Gate,
    }

    impl StorageBackend for GatedBackend {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
            self.inner.read_at(offset, buf)
        }

        fn append(&self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(data)
        }

        fn sync(&self) -> StorageResult<()> {
            if let Some((entered, release)) = self.gate.lock().take() {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.inner.sync()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn truncate(&self, new_size: u64) -> StorageResult<()> {
            self.inner.truncate(new_size)
        }
    }

    #[test]
    fn tail_reads_do_not_wait_for_sync() {
        let gate: Gate = Arc::default();
        let backend = GatedBackend {
            inner: InMemoryBackend::new(),
            gate: Arc::clone(&gate),
        };
        let seg = SegmentFile::create(Box::new(backend), &info(1, 4096), BufferPool::new()).unwrap();
        seg.append(&entries(1..=1)).unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *gate.lock() = Some((entered_tx, release_rx));

        std::thread::scope(|s| {
            let writer = s.spawn(|| seg.append(&entries(2..=2)));
            entered_rx.recv().unwrap();

            // The append is parked inside sync.
            assert_eq!(&seg.get_log(1).unwrap()[..], b"entry-1");
            assert!(seg.get_log(2).unwrap_err().is_not_found());
            assert_eq!(seg.last_index(), 1);

            release_tx.send(()).unwrap();
            writer.join().unwrap().unwrap();
        });

        assert_eq!(&seg.get_log(2).unwrap()[..], b"entry-2");
        assert_eq!(seg.last_index(), 2);
    }

    #[test]
    fn create_writes_header() {
        let (backend, seg) = new_segment(5, 4096);
        assert_eq!(backend.data().len(), HEADER_SIZE);
        assert_eq!(seg.last_index(), 0);
        assert!(seg.is_empty());
        assert!(seg.sealed().is_none());
    }

    #[test]
    fn append_and_read_back() {
        let (_backend, seg) = new_segment(5, 4096);
        seg.append(&entries(5..=7)).unwrap();

        assert_eq!(seg.last_index(), 7);
        assert_eq!(&seg.get_log(6).unwrap()[..], b"entry-6");
        assert!(seg.get_log(4).unwrap_err().is_not_found());
        assert!(seg.get_log(8).unwrap_err().is_not_found());
    }

    #[test]
    fn append_rejects_gaps() {
        let (_backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=2)).unwrap();

        let err = seg.append(&entries(4..=4)).unwrap_err();
        assert!(matches!(
            err,
            WalError::NonMonotonic {
                attempted: 4,
                last: 2
            }
        ));
        assert_eq!(seg.last_index(), 2);
    }

    #[test]
    fn append_rejects_wrong_first_index() {
        let (_backend, seg) = new_segment(10, 4096);
        assert!(seg.append(&entries(11..=11)).is_err());
        assert_eq!(seg.last_index(), 0);
    }

    #[test]
    fn seals_at_size_limit() {
        let (_backend, seg) = new_segment(1, 128);
        seg.append(&entries(1..=2)).unwrap();
        assert!(seg.sealed().is_none());

        seg.append(&entries(3..=5)).unwrap();
        let at = seg.sealed().expect("segment should be sealed");
        assert!(at >= 128);
        assert!(matches!(
            seg.append(&entries(6..=6)),
            Err(WalError::Sealed)
        ));
        assert_eq!(&seg.get_log(5).unwrap()[..], b"entry-5");
    }

    #[test]
    fn force_seal_is_idempotent() {
        let (backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=3)).unwrap();

        let first = seg.force_seal().unwrap();
        let size = backend.data().len();
        assert_eq!(seg.force_seal().unwrap(), first);
        assert_eq!(backend.data().len(), size);
    }

    #[test]
    fn sealed_segment_reopens_from_index_block() {
        let (backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=4)).unwrap();
        let at = seg.force_seal().unwrap();

        let mut sealed = info(1, 4096);
        sealed.index_start = at;
        let reader =
            SegmentFile::open_sealed(Box::new(backend.clone()), &sealed, BufferPool::new())
                .unwrap();
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.last_index(), 4);
        assert_eq!(&reader.get_log(3).unwrap()[..], b"entry-3");
    }

    #[test]
    fn open_sealed_rejects_mismatched_header() {
        let (backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=2)).unwrap();
        let at = seg.force_seal().unwrap();

        let mut wrong = info(2, 4096);
        wrong.index_start = at;
        let err = SegmentFile::open_sealed(Box::new(backend), &wrong, BufferPool::new())
            .unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn recover_truncates_torn_frame() {
        let (backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=3)).unwrap();
        let mut data = backend.data();
        data.truncate(data.len() - 3);
        backend.set_data(data);

        let recovered =
            SegmentFile::recover(Box::new(backend.clone()), &info(1, 4096), BufferPool::new())
                .unwrap();
        assert_eq!(recovered.last_index(), 2);
        recovered.append(&entries(3..=3)).unwrap();
        assert_eq!(&recovered.get_log(3).unwrap()[..], b"entry-3");
    }

    #[test]
    fn recover_stops_at_bad_checksum() {
        let (backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=3)).unwrap();
        let mut data = backend.data();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        backend.set_data(data);

        let recovered =
            SegmentFile::recover(Box::new(backend), &info(1, 4096), BufferPool::new()).unwrap();
        assert_eq!(recovered.last_index(), 2);
    }

    #[test]
    fn recover_strips_index_block() {
        let (backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=3)).unwrap();
        let at = seg.force_seal().unwrap();

        let recovered =
            SegmentFile::recover(Box::new(backend.clone()), &info(1, 4096), BufferPool::new())
                .unwrap();
        assert_eq!(recovered.last_index(), 3);
        assert!(recovered.sealed().is_none());
        assert_eq!(backend.data().len() as u64, at);
        recovered.append(&entries(4..=4)).unwrap();
    }

    #[test]
    fn recover_reinitializes_torn_header() {
        let backend = InMemoryBackend::with_data(vec![b'S', b'W']);
        let recovered =
            SegmentFile::recover(Box::new(backend.clone()), &info(1, 4096), BufferPool::new())
                .unwrap();
        assert_eq!(recovered.last_index(), 0);
        assert_eq!(backend.data().len(), HEADER_SIZE);
    }

    #[test]
    fn reads_after_close_fail() {
        let (_backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=1)).unwrap();
        seg.close().unwrap();
        assert!(matches!(seg.get_log(1), Err(WalError::Closed)));
    }

    #[test]
    fn corrupt_frame_is_reported_on_read() {
        let (backend, seg) = new_segment(1, 4096);
        seg.append(&entries(1..=2)).unwrap();
        let mut data = backend.data();
        data[HEADER_SIZE + FRAME_HEADER_SIZE] ^= 0xFF;
        backend.set_data(data);

        let err = seg.get_log(1).unwrap_err();
        assert!(matches!(err, WalError::ChecksumMismatch { .. }));
        assert_eq!(&seg.get_log(2).unwrap()[..], b"entry-2");
    }
}
