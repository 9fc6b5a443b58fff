//! Immutable WAL state snapshots.
//!
//! Readers load the current `Arc<State>` without taking the write lock. The
//! writer never mutates a published state: it clones it, changes the clone
//! and publishes that. Segments retired by the change are handed to a
//! finalizer attached to the *old* state, which runs when the last reader
//! holding it lets go.
//!
//! Each open segment lives in a [`SegmentSlot`] shared by every state that
//! references it. The finalizer only marks the slot; the file is closed and
//! deleted when the slot itself is dropped, so a reader still holding an even
//! older state keeps a working segment.

use crate::error::{WalError, WalResult};
use crate::meta::{PersistentState, SegmentInfo};
use crate::segment::{PooledBuffer, SegmentReader, SegmentWriter};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Cleanup run when a state is no longer referenced.
pub(crate) type Finalizer = Box<dyn FnOnce() + Send>;

/// An open segment, either the writable tail or a sealed reader.
#[derive(Debug, Clone)]
pub(crate) enum SegmentHandle {
    Sealed(Arc<dyn SegmentReader>),
    Tail(Arc<dyn SegmentWriter>),
}

impl SegmentHandle {
    pub(crate) fn get_log(&self, index: u64) -> WalResult<PooledBuffer> {
        match self {
            Self::Sealed(r) => r.get_log(index),
            Self::Tail(w) => w.get_log(index),
        }
    }

    pub(crate) fn close(&self) -> WalResult<()> {
        match self {
            Self::Sealed(r) => r.close(),
            Self::Tail(w) => w.close(),
        }
    }
}

/// An open segment shared between states.
pub(crate) struct SegmentSlot {
    pub(crate) handle: SegmentHandle,
    on_release: Mutex<Option<Finalizer>>,
}

impl SegmentSlot {
    pub(crate) fn tail(writer: Arc<dyn SegmentWriter>) -> Arc<Self> {
        Self::new(SegmentHandle::Tail(writer))
    }

    pub(crate) fn sealed(reader: Arc<dyn SegmentReader>) -> Arc<Self> {
        Self::new(SegmentHandle::Sealed(reader))
    }

    fn new(handle: SegmentHandle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            on_release: Mutex::new(None),
        })
    }

    /// Runs `f` once no state references this segment any more.
    pub(crate) fn retire(&self, f: Finalizer) {
        let mut slot = self.on_release.lock();
        if slot.is_none() {
            *slot = Some(f);
        }
    }
}

impl Drop for SegmentSlot {
    fn drop(&mut self) {
        if let Some(release) = self.on_release.get_mut().take() {
            release();
        }
    }
}

impl fmt::Debug for SegmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentSlot")
            .field("handle", &self.handle)
            .field("retired", &self.on_release.lock().is_some())
            .finish()
    }
}

/// A catalog entry together with its open segment.
#[derive(Debug, Clone)]
pub(crate) struct SegmentState {
    pub(crate) info: SegmentInfo,
    pub(crate) slot: Arc<SegmentSlot>,
}

pub(crate) struct State {
    pub(crate) next_segment_id: u64,
    /// Base index for the next tail when no segment remains to derive it from.
    pub(crate) next_base_index: u64,
    /// Segments keyed by base index.
    pub(crate) segments: BTreeMap<u64, SegmentState>,
    pub(crate) tail: Option<Arc<dyn SegmentWriter>>,
    finalizer: Mutex<Option<Finalizer>>,
}

impl State {
    pub(crate) fn empty() -> Self {
        Self {
            next_segment_id: 1,
            next_base_index: 0,
            segments: BTreeMap::new(),
            tail: None,
            finalizer: Mutex::new(None),
        }
    }

    /// Attaches a finalizer unless one is already set.
    ///
    /// Returns false if the state already had a finalizer.
    pub(crate) fn set_finalizer(&self, f: Finalizer) -> bool {
        let mut slot = self.finalizer.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(f);
        true
    }

    fn tail_last_index(&self) -> u64 {
        self.tail.as_ref().map_or(0, |t| t.last_index())
    }

    /// Returns the descriptor of the newest segment.
    pub(crate) fn tail_info(&self) -> Option<&SegmentInfo> {
        self.segments.values().next_back().map(|s| &s.info)
    }

    pub(crate) fn first_index(&self) -> u64 {
        let Some(first) = self.segments.values().next() else {
            return 0;
        };
        // An unsealed first segment is the tail; if it has nothing in it
        // its base/min index say nothing about the log.
        if !first.info.is_sealed() && self.tail_last_index() == 0 {
            return 0;
        }
        first.info.min_index
    }

    pub(crate) fn last_index(&self) -> u64 {
        let tail_last = self.tail_last_index();
        if tail_last > 0 {
            return tail_last;
        }
        let mut newest = self.segments.values().rev();
        match newest.next() {
            Some(s) if s.info.is_sealed() => s.info.max_index,
            Some(_) => newest.next().map_or(0, |s| s.info.max_index),
            None => 0,
        }
    }

    /// Returns the encoded bytes for `index` and the codec they were
    /// written with.
    pub(crate) fn get_log(&self, index: u64) -> WalResult<(PooledBuffer, u64)> {
        let first = self.first_index();
        if first == 0 || index < first || index > self.last_index() {
            return Err(WalError::NotFound);
        }
        let (_, seg) = self
            .segments
            .range(..=index)
            .next_back()
            .ok_or(WalError::NotFound)?;
        if index < seg.info.min_index || (seg.info.is_sealed() && index > seg.info.max_index) {
            return Err(WalError::NotFound);
        }
        let buf = seg.slot.handle.get_log(index)?;
        Ok((buf, seg.info.codec))
    }

    pub(crate) fn persistent(&self) -> PersistentState {
        PersistentState {
            next_segment_id: self.next_segment_id,
            segments: self.segments.values().map(|s| s.info.clone()).collect(),
        }
    }

    pub(crate) fn handles(&self) -> Vec<SegmentHandle> {
        self.segments
            .values()
            .map(|s| s.slot.handle.clone())
            .collect()
    }
}

impl Clone for State {
    /// Copies the segment map and tail; the finalizer stays with `self`.
    fn clone(&self) -> Self {
        Self {
            next_segment_id: self.next_segment_id,
            next_base_index: self.next_base_index,
            segments: self.segments.clone(),
            tail: self.tail.clone(),
            finalizer: Mutex::new(None),
        }
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if let Some(finalize) = self.finalizer.get_mut().take() {
            finalize();
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("next_segment_id", &self.next_segment_id)
            .field("next_base_index", &self.next_base_index)
            .field("segments", &self.segments.len())
            .field("first_index", &self.first_index())
            .field("last_index", &self.last_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{EncodedEntry, MemorySegmentFiler, SegmentFiler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    fn info(id: u64, base: u64) -> SegmentInfo {
        SegmentInfo {
            id,
            base_index: base,
            min_index: base,
            max_index: 0,
            size_limit: 1 << 20,
            codec: 1,
            index_start: 0,
            create_time: SystemTime::now(),
            seal_time: None,
        }
    }

    fn append(w: &Arc<dyn SegmentWriter>, range: std::ops::RangeInclusive<u64>) {
        let batch: Vec<_> = range
            .map(|index| EncodedEntry {
                index,
                data: index.to_le_bytes().to_vec(),
            })
            .collect();
        w.append(&batch).unwrap();
    }

    /// Sealed segment [1, 10] plus a tail starting at 11 holding `tail_entries`.
    fn two_segment_state(tail_entries: u64) -> State {
        let filer = MemorySegmentFiler::new();

        let first = filer.create(&info(1, 1)).unwrap();
        append(&first, 1..=10);
        let mut sealed = info(1, 1);
        sealed.index_start = first.force_seal().unwrap();
        sealed.max_index = 10;
        sealed.seal_time = Some(SystemTime::now());

        let tail = filer.create(&info(2, 11)).unwrap();
        if tail_entries > 0 {
            append(&tail, 11..=10 + tail_entries);
        }

        let mut state = State::empty();
        state.next_segment_id = 3;
        state.segments.insert(
            1,
            SegmentState {
                info: sealed,
                slot: SegmentSlot::tail(first),
            },
        );
        state.segments.insert(
            11,
            SegmentState {
                info: info(2, 11),
                slot: SegmentSlot::tail(Arc::clone(&tail)),
            },
        );
        state.tail = Some(tail);
        state
    }

    #[test]
    fn empty_state() {
        let state = State::empty();
        assert_eq!(state.first_index(), 0);
        assert_eq!(state.last_index(), 0);
        assert!(state.get_log(1).unwrap_err().is_not_found());
    }

    #[test]
    fn empty_tail_only() {
        let filer = MemorySegmentFiler::new();
        let tail = filer.create(&info(1, 50)).unwrap();
        let mut state = State::empty();
        state.segments.insert(
            50,
            SegmentState {
                info: info(1, 50),
                slot: SegmentSlot::tail(Arc::clone(&tail)),
            },
        );
        state.tail = Some(tail);

        assert_eq!(state.first_index(), 0);
        assert_eq!(state.last_index(), 0);
    }

    #[test]
    fn indexes_span_segments() {
        let state = two_segment_state(5);
        assert_eq!(state.first_index(), 1);
        assert_eq!(state.last_index(), 15);

        let (buf, codec) = state.get_log(10).unwrap();
        assert_eq!(&buf[..], &10u64.to_le_bytes());
        assert_eq!(codec, 1);
        let (buf, _) = state.get_log(13).unwrap();
        assert_eq!(&buf[..], &13u64.to_le_bytes());
        assert!(state.get_log(16).unwrap_err().is_not_found());
        assert!(state.get_log(0).unwrap_err().is_not_found());
    }

    #[test]
    fn empty_tail_falls_back_to_sealed_max() {
        let state = two_segment_state(0);
        assert_eq!(state.first_index(), 1);
        assert_eq!(state.last_index(), 10);
    }

    #[test]
    fn descriptor_bounds_reads() {
        let mut state = two_segment_state(5);
        if let Some(seg) = state.segments.get_mut(&1) {
            seg.info.min_index = 4;
            seg.info.max_index = 8;
        }
        assert_eq!(state.first_index(), 4);
        assert!(state.get_log(3).unwrap_err().is_not_found());
        assert!(state.get_log(9).unwrap_err().is_not_found());
        assert!(state.get_log(8).is_ok());
    }

    #[test]
    fn persistent_lists_segments_in_order() {
        let state = two_segment_state(1);
        let persisted = state.persistent();
        assert_eq!(persisted.next_segment_id, 3);
        let bases: Vec<_> = persisted.segments.iter().map(|s| s.base_index).collect();
        assert_eq!(bases, vec![1, 11]);
        assert_eq!(state.tail_info().map(|s| s.id), Some(2));
    }

    #[test]
    fn finalizer_runs_once_when_last_reference_drops() {
        let runs = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(State::empty());
        let reader = Arc::clone(&state);

        let counter = Arc::clone(&runs);
        assert!(state.set_finalizer(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        assert!(!state.set_finalizer(Box::new(|| {})));

        drop(state);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        drop(reader);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retired_slot_releases_after_last_state() {
        let runs = Arc::new(AtomicUsize::new(0));
        let older = two_segment_state(1);
        let newer = older.clone();

        let counter = Arc::clone(&runs);
        newer.segments[&1].slot.retire(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        drop(newer);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(older.get_log(3).is_ok());
        drop(older);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clone_does_not_copy_finalizer() {
        let runs = Arc::new(AtomicUsize::new(0));
        let state = two_segment_state(2);
        let counter = Arc::clone(&runs);
        state.set_finalizer(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let copy = state.clone();
        assert_eq!(copy.last_index(), 12);
        drop(copy);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        drop(state);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
