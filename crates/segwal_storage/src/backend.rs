//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for segment files.
///
/// Storage backends are **opaque byte stores**. The segment layer owns all
/// format interpretation; backends do not understand frames or index blocks.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` fills the buffer with exactly the bytes previously written there
/// - `sync` makes all appended data and the current length durable
/// - Backends synchronize internally: readers may call `read_at` while a
///   writer is appending or syncing, and a sync must not hold up reads
pub trait StorageBackend: Send + Sync {
    /// Reads `buf.len()` bytes starting at `offset` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends beyond
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs or the backend is read-only.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// After this returns successfully, all previously appended data
    /// is guaranteed to survive process termination and power loss.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the storage to the given size and syncs it.
    ///
    /// Used by tail recovery to drop torn trailing bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or the
    /// truncation fails.
    fn truncate(&self, new_size: u64) -> StorageResult<()>;
}
