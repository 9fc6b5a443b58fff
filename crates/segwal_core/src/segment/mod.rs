//! Segment files.
//!
//! A segment holds a contiguous run of log entries. It moves through
//! `Writing → Sealed`: the tail segment accepts appends until it reaches its
//! size budget (or is force-sealed by tail truncation), at which point it
//! writes a trailing index block and becomes read-only.
//!
//! - [`format`] - On-disk layout of headers, frames and index blocks
//! - [`SegmentFile`] - The writer/reader over a [`segwal_storage::StorageBackend`]
//! - [`SegmentFiler`] - Creates, recovers, opens and deletes segments
//! - [`BufferPool`] - Recycled read buffers

pub mod format;
mod file;
mod filer;
mod pool;

pub use file::SegmentFile;
pub use filer::{FileSegmentFiler, MemorySegmentFiler, SegmentFiler};
pub use pool::{BufferPool, PooledBuffer};

use crate::error::WalResult;
use std::fmt;

/// An entry that has already been through the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEntry {
    /// Log index of the entry.
    pub index: u64,
    /// Codec output.
    pub data: Vec<u8>,
}

/// Read access to a segment.
pub trait SegmentReader: Send + Sync + fmt::Debug {
    /// Returns the encoded bytes stored for `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WalError::NotFound`] if the segment does not hold the
    /// index (yet), a corruption error if the frame fails validation, or
    /// [`crate::WalError::Closed`] after `close`.
    fn get_log(&self, index: u64) -> WalResult<PooledBuffer>;

    /// Releases the underlying file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be released.
    fn close(&self) -> WalResult<()>;
}

/// Write access to the tail segment.
pub trait SegmentWriter: SegmentReader {
    /// Durably appends a batch of entries.
    ///
    /// Every entry's index must be exactly one past the previous one, the
    /// first being one past [`SegmentWriter::last_index`] (or the base index
    /// for an empty segment). The whole batch is written and synced before
    /// this returns; on error none of it is visible.
    ///
    /// If the segment reaches its size budget, the index block is written
    /// with the same sync and the segment becomes sealed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WalError::Sealed`] if the segment is sealed,
    /// [`crate::WalError::NonMonotonic`] on an index gap, or an I/O error.
    fn append(&self, entries: &[EncodedEntry]) -> WalResult<()>;

    /// Returns the index block offset once the segment has sealed.
    fn sealed(&self) -> Option<u64>;

    /// Seals the segment regardless of its size and returns the index block
    /// offset. Sealing an already sealed segment returns the existing offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the index block cannot be written.
    fn force_seal(&self) -> WalResult<u64>;

    /// Returns the last index written, 0 if the segment is empty.
    fn last_index(&self) -> u64;
}
