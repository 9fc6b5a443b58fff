//! Prefix and suffix deletion.

use super::rotate::{Txn, WriteGuard};
use super::{Wal, WalInner};
use crate::error::{WalError, WalResult};
use crate::state::SegmentHandle;
use crate::stats::names;
use std::time::SystemTime;
use tracing::debug;

impl Wal {
    /// Deletes the entries in `[min, max]`.
    ///
    /// The range must touch one end of the log: a range reaching the first
    /// index removes a prefix, a range reaching the last index removes a
    /// suffix. Ranges entirely outside the log, and empty ranges, are
    /// no-ops. Deleting everything leaves an empty log whose next append may
    /// start at any index.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::BadRange`] for a range strictly inside the log,
    /// [`WalError::Closed`] after `close`, or an I/O error.
    pub fn delete_range(&self, min: u64, max: u64) -> WalResult<()> {
        let inner = &self.inner;
        inner.check_open()?;
        if min > max {
            return Ok(());
        }

        let mut w = inner.writer.lock();
        inner.await_rotation(&mut w);
        inner.check_open()?;

        let (first, last) = {
            let state = inner.state.load();
            (state.first_index(), state.last_index())
        };
        if last == 0 || max < first || min > last {
            return Ok(());
        }
        if min <= first {
            return inner.truncate_head_locked(&mut w, max.saturating_add(1));
        }
        if max >= last {
            return inner.truncate_tail_locked(&mut w, min - 1);
        }
        Err(WalError::BadRange {
            min,
            max,
            first,
            last,
        })
    }
}

impl WalInner {
    /// Drops every entry below `new_min`.
    ///
    /// Whole segments below `new_min` are retired; the segment holding
    /// `new_min` only has its min index raised.
    fn truncate_head_locked(&self, w: &mut WriteGuard<'_>, new_min: u64) -> WalResult<()> {
        let mut removed = 0u64;
        self.mutate_state_locked(w, |state| {
            let old_last = state.last_index();
            let tail_last = state.tail.as_ref().map_or(0, |t| t.last_index());
            let mut retired = Vec::new();

            let bases: Vec<u64> = state.segments.keys().copied().collect();
            for base in bases {
                let Some(seg) = state.segments.get_mut(&base) else {
                    continue;
                };
                let seg_last = if seg.info.is_sealed() {
                    seg.info.max_index
                } else {
                    tail_last
                };
                if seg_last >= new_min {
                    removed += new_min.saturating_sub(seg.info.min_index);
                    seg.info.min_index = seg.info.min_index.max(new_min);
                    break;
                }
                if seg_last >= seg.info.min_index {
                    removed += seg_last - seg.info.min_index + 1;
                }
                if let Some(seg) = state.segments.remove(&base) {
                    if !seg.info.is_sealed() {
                        state.tail = None;
                    }
                    retired.push(seg);
                }
            }

            let purged = state.segments.is_empty();
            if purged {
                state.next_base_index = old_last + 1;
            }
            debug!(
                parent: &self.span,
                new_min,
                retired = retired.len(),
                purged,
                "truncating head"
            );
            Ok(Txn {
                finalizer: self.retire(retired),
                new_tail: purged,
            })
        })?;
        self.count(names::HEAD_TRUNCATIONS, removed);
        Ok(())
    }

    /// Drops every entry above `new_max` and starts a new tail after it.
    ///
    /// Segments starting above `new_max` are retired. The segment holding
    /// `new_max` is sealed (if it was the tail) and its max index lowered;
    /// frames past it stay in the file but are unreachable.
    fn truncate_tail_locked(&self, w: &mut WriteGuard<'_>, new_max: u64) -> WalResult<()> {
        let mut removed = 0u64;
        self.mutate_state_locked(w, |state| {
            removed = state.last_index().saturating_sub(new_max);
            let mut retired = Vec::new();

            let bases: Vec<u64> = state.segments.keys().rev().copied().collect();
            for base in bases {
                if base <= new_max {
                    break;
                }
                if let Some(seg) = state.segments.remove(&base) {
                    if !seg.info.is_sealed() {
                        state.tail = None;
                    }
                    retired.push(seg);
                }
            }

            let seg = state
                .segments
                .values_mut()
                .next_back()
                .ok_or_else(|| WalError::corrupt(format!("no segment holds index {new_max}")))?;
            if !seg.info.is_sealed() {
                let index_start = match &seg.slot.handle {
                    SegmentHandle::Tail(writer) => writer.force_seal()?,
                    SegmentHandle::Sealed(_) => {
                        return Err(WalError::corrupt(format!(
                            "unsealed segment {} has no writer",
                            seg.info.id
                        )))
                    }
                };
                seg.info.index_start = index_start;
                seg.info.seal_time = Some(SystemTime::now());
                state.tail = None;
            }
            seg.info.max_index = new_max;

            debug!(
                parent: &self.span,
                new_max,
                retired = retired.len(),
                "truncating tail"
            );
            Ok(Txn {
                finalizer: self.retire(retired),
                new_tail: true,
            })
        })?;
        self.count(names::TAIL_TRUNCATIONS, removed);
        Ok(())
    }
}
