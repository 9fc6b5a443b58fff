//! State transactions and segment rotation.
//!
//! Every change to the segment set goes through [`WalInner::mutate_state_locked`]:
//!
//! 1. Clone the current state
//! 2. Apply the change to the clone
//! 3. Commit the resulting catalog (plus a new tail descriptor if needed)
//! 4. Create the new tail file
//! 5. Publish the clone and hand retired segments to the old state's finalizer
//!
//! The catalog is committed before a new segment file is created, so a
//! segment ID is never reused even if we crash in between. Recovery creates
//! the missing tail file from its descriptor.

use super::WalInner;
use crate::error::{WalError, WalResult};
use crate::meta::{MetaStore, SegmentInfo};
use crate::segment::SegmentFiler;
use crate::state::{Finalizer, SegmentSlot, SegmentState, State};
use crate::stats::names;
use parking_lot::MutexGuard;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, warn, Span};

/// Writer-side bookkeeping guarded by the WAL write lock.
#[derive(Debug, Default)]
pub(crate) struct WriterState {
    /// Set while a rotation is queued or running.
    pub(crate) rotating: bool,
    /// Wakes the rotation worker; dropped on close.
    pub(crate) trigger: Option<SyncSender<u64>>,
}

pub(crate) type WriteGuard<'a> = MutexGuard<'a, WriterState>;

/// What a state transaction wants done besides committing the catalog.
#[derive(Default)]
pub(crate) struct Txn {
    /// Runs once the replaced state is no longer referenced.
    pub(crate) finalizer: Option<Finalizer>,
    /// Allocate and create a fresh tail segment.
    pub(crate) new_tail: bool,
}

/// Adds a new empty tail to `state`: commits the catalog, then creates the
/// file.
///
/// The base index is one past the newest segment's max index, or the
/// recorded hint when no segment remains, or 1 for a brand-new log.
pub(crate) fn install_new_tail(
    state: &mut State,
    meta: &dyn MetaStore,
    filer: &dyn SegmentFiler,
    segment_size: u32,
    codec: u64,
) -> WalResult<()> {
    let base_index = match state.tail_info() {
        Some(newest) => newest.max_index + 1,
        None if state.next_base_index > 0 => state.next_base_index,
        None => 1,
    };
    let info = SegmentInfo {
        id: state.next_segment_id,
        base_index,
        min_index: base_index,
        max_index: 0,
        size_limit: segment_size,
        codec,
        index_start: 0,
        create_time: SystemTime::now(),
        seal_time: None,
    };

    let mut persisted = state.persistent();
    persisted.next_segment_id = info.id + 1;
    persisted.segments.push(info.clone());
    meta.commit(&persisted)?;

    let writer = match filer.create(&info) {
        Ok(writer) => writer,
        Err(e) => {
            // The catalog already owns this ID; a retry must be able to
            // create the file again.
            if let Err(cleanup) = filer.delete(info.base_index, info.id) {
                if !cleanup.is_missing_file() {
                    warn!(segment_id = info.id, error = %cleanup, "failed to remove partial segment");
                }
            }
            return Err(e);
        }
    };
    debug!(segment_id = info.id, base_index, "created tail segment");

    state.next_segment_id = info.id + 1;
    state.next_base_index = 0;
    state.segments.insert(
        base_index,
        SegmentState {
            info,
            slot: SegmentSlot::tail(Arc::clone(&writer)),
        },
    );
    state.tail = Some(writer);
    Ok(())
}

impl WalInner {
    /// Applies `tx` to a copy of the current state, commits and publishes it.
    ///
    /// On error nothing is published and the current state stays in effect.
    pub(crate) fn mutate_state_locked<F>(&self, _w: &mut WriteGuard<'_>, tx: F) -> WalResult<()>
    where
        F: FnOnce(&mut State) -> WalResult<Txn>,
    {
        let old = self.state.load_full();
        let mut next = State::clone(&old);
        let txn = tx(&mut next)?;

        if txn.new_tail {
            install_new_tail(
                &mut next,
                self.meta.as_ref(),
                self.filer.as_ref(),
                self.segment_size,
                self.codec.id(),
            )?;
        } else {
            self.meta.commit(&next.persistent())?;
        }

        self.state.store(Arc::new(next));
        if let Some(finalize) = txn.finalizer {
            old.set_finalizer(finalize);
        }
        Ok(())
    }

    /// Returns a finalizer that closes and deletes `retired`.
    ///
    /// The file goes away once no state references the segment, which may
    /// be later than the finalizer itself if a reader holds an older state.
    pub(crate) fn retire(&self, retired: Vec<SegmentState>) -> Option<Finalizer> {
        if retired.is_empty() {
            return None;
        }
        let filer = Arc::clone(&self.filer);
        let span = self.span.clone();
        Some(Box::new(move || {
            for seg in retired {
                let handle = seg.slot.handle.clone();
                let info = seg.info.clone();
                let filer = Arc::clone(&filer);
                let span = span.clone();
                seg.slot.retire(Box::new(move || {
                    if let Err(e) = handle.close() {
                        warn!(parent: &span, segment_id = info.id, error = %e, "failed to close retired segment");
                    }
                    if let Err(e) = filer.delete(info.base_index, info.id) {
                        error!(parent: &span, segment_id = info.id, error = %e, "failed to delete retired segment");
                    }
                }));
            }
        }))
    }

    /// Seals the tail descriptor and installs a new tail.
    pub(crate) fn rotate_locked(&self, w: &mut WriteGuard<'_>, index_start: u64) -> WalResult<()> {
        let mut age_seconds = 0;
        self.mutate_state_locked(w, |state| {
            let tail = state
                .tail
                .take()
                .ok_or_else(|| WalError::corrupt("rotation without a tail segment"))?;
            let seg = state
                .segments
                .values_mut()
                .next_back()
                .ok_or_else(|| WalError::corrupt("rotation without a tail descriptor"))?;

            let now = SystemTime::now();
            seg.info.seal_time = Some(now);
            seg.info.max_index = tail.last_index();
            seg.info.index_start = index_start;
            age_seconds = now
                .duration_since(seg.info.create_time)
                .unwrap_or_default()
                .as_secs();
            debug!(
                parent: &self.span,
                segment_id = seg.info.id,
                max_index = seg.info.max_index,
                "sealing tail segment"
            );
            Ok(Txn {
                finalizer: None,
                new_tail: true,
            })
        })?;

        self.count(names::SEGMENT_ROTATIONS, 1);
        self.gauge(names::LAST_SEGMENT_AGE_SECONDS, age_seconds);
        Ok(())
    }

    /// Replaces the empty tail with one starting at `base_index`.
    ///
    /// Lets the first append choose where the log starts.
    pub(crate) fn reset_base_index_locked(
        &self,
        w: &mut WriteGuard<'_>,
        base_index: u64,
    ) -> WalResult<()> {
        self.mutate_state_locked(w, |state| {
            if state.last_index() > 0 {
                return Err(WalError::corrupt(
                    "cannot move the base index of a non-empty log",
                ));
            }
            let retired: Vec<_> = std::mem::take(&mut state.segments).into_values().collect();
            state.tail = None;
            state.next_base_index = base_index;
            debug!(parent: &self.span, base_index, "rebasing empty log");
            Ok(Txn {
                finalizer: self.retire(retired),
                new_tail: true,
            })
        })
    }

    /// Blocks until no rotation is pending.
    pub(crate) fn await_rotation(&self, w: &mut WriteGuard<'_>) {
        while w.rotating {
            self.rotation_done.wait(w);
        }
    }

    /// Hands a sealed tail to the rotation worker.
    pub(crate) fn trigger_rotation_locked(&self, w: &mut WriteGuard<'_>, index_start: u64) {
        let Some(trigger) = w.trigger.as_ref() else {
            return;
        };
        match trigger.try_send(index_start) {
            Ok(()) => w.rotating = true,
            Err(TrySendError::Full(_)) => {
                // Unreachable while `rotating` gates appends; the next append
                // notices the sealed tail and rotates inline.
                warn!(parent: &self.span, "rotation already queued");
            }
            Err(TrySendError::Disconnected(_)) => {
                error!(parent: &self.span, "rotation worker is gone");
            }
        }
    }
}

/// Body of the rotation worker thread.
pub(crate) fn run_rotation_worker(inner: Arc<WalInner>, rx: Receiver<u64>) {
    let span: Span = inner.span.clone();
    debug!(parent: &span, "rotation worker started");
    while let Ok(index_start) = rx.recv() {
        let mut w = inner.writer.lock();
        if w.trigger.is_none() {
            // Shut down before we got the lock.
            w.rotating = false;
            inner.rotation_done.notify_all();
            break;
        }
        if let Err(e) = inner.rotate_locked(&mut w, index_start) {
            error!(parent: &span, error = %e, "segment rotation failed");
        }
        w.rotating = false;
        inner.rotation_done.notify_all();
    }
    debug!(parent: &span, "rotation worker stopped");
}
