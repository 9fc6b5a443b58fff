//! Append path.

use super::Wal;
use crate::error::{WalError, WalResult};
use crate::segment::EncodedEntry;
use crate::stats::names;
use segwal_codec::LogEntry;
use tracing::warn;

impl Wal {
    /// Appends a single entry.
    ///
    /// # Errors
    ///
    /// Same as [`Wal::store_logs`].
    pub fn store_log(&self, entry: &LogEntry) -> WalResult<()> {
        self.store_logs(std::slice::from_ref(entry))
    }

    /// Durably appends a batch of entries.
    ///
    /// The first entry must follow the current last index; on an empty log
    /// it may be any index from 1 up and becomes the log's first index.
    /// Each further entry must follow the previous one. On error none of the
    /// entries are stored.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::NonMonotonic`] if the batch breaks the sequence,
    /// [`WalError::Closed`] after `close`, or an I/O error.
    pub fn store_logs(&self, entries: &[LogEntry]) -> WalResult<()> {
        let inner = &self.inner;
        inner.check_open()?;
        let Some(head) = entries.first() else {
            return Ok(());
        };

        let mut w = inner.writer.lock();
        inner.await_rotation(&mut w);
        inner.check_open()?;

        // A sealed tail that is still installed means an earlier rotation
        // failed; finish it before writing anything.
        let pending_seal = inner.state.load().tail.as_ref().and_then(|t| t.sealed());
        if let Some(index_start) = pending_seal {
            warn!(parent: &inner.span, index_start, "retrying failed segment rotation");
            inner.rotate_locked(&mut w, index_start)?;
        }

        let mut state = inner.state.load_full();
        let last = state.last_index();
        let start = if last == 0 { head.index } else { last + 1 };
        if start == 0 {
            return Err(WalError::NonMonotonic {
                attempted: 0,
                last: 0,
            });
        }
        let mut prev = last;
        for (offset, entry) in (0u64..).zip(entries) {
            if entry.index != start + offset {
                return Err(WalError::NonMonotonic {
                    attempted: entry.index,
                    last: prev,
                });
            }
            prev = entry.index;
        }

        let tail_base = state.tail_info().map(|t| t.base_index);
        if last == 0 && tail_base.is_some_and(|base| base != head.index) {
            drop(state);
            inner.reset_base_index_locked(&mut w, head.index)?;
            state = inner.state.load_full();
        }

        let tail = state.tail.clone().ok_or(WalError::Closed)?;
        let codec_id = state.tail_info().map_or(inner.codec.id(), |t| t.codec);
        let codec = inner.codec_for(codec_id)?;

        // One buffer per entry; the segment frames each separately.
        let mut encoded = Vec::with_capacity(entries.len());
        let mut bytes = 0u64;
        for entry in entries {
            let mut data = Vec::new();
            codec.encode(entry, &mut data)?;
            bytes += data.len() as u64;
            encoded.push(EncodedEntry {
                index: entry.index,
                data,
            });
        }

        tail.append(&encoded)?;

        inner.count(names::LOG_APPENDS, 1);
        inner.count(names::LOG_ENTRIES_WRITTEN, entries.len() as u64);
        inner.count(names::LOG_ENTRY_BYTES_WRITTEN, bytes);

        if let Some(index_start) = tail.sealed() {
            inner.trigger_rotation_locked(&mut w, index_start);
        }
        Ok(())
    }
}
