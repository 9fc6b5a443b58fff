//! Error types for the WAL engine.

use segwal_codec::CodecError;
use segwal_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur in WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// The index is outside the range currently held by the log.
    #[error("log entry not found")]
    NotFound,

    /// A header, frame or index block failed validation.
    #[error("corruption detected: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Attempted to append to a sealed segment.
    #[error("segment is sealed")]
    Sealed,

    /// The WAL handle has been closed.
    #[error("WAL is closed")]
    Closed,

    /// An append batch violated the index contract.
    #[error("non-monotonic log entries: tried to append index {attempted} after {last}")]
    NonMonotonic {
        /// Index of the offending entry.
        attempted: u64,
        /// Index the entry had to follow (0 for an empty log).
        last: u64,
    },

    /// A delete range lies strictly inside the log.
    #[error(
        "only suffix or prefix ranges may be deleted from the log: [{min}, {max}] is inside [{first}, {last}]"
    )]
    BadRange {
        /// Requested range start.
        min: u64,
        /// Requested range end.
        max: u64,
        /// First index of the log.
        first: u64,
        /// Last index of the log.
        last: u64,
    },

    /// Option validation failed at open time.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A stable value read as u64 is not 8 bytes long.
    #[error("stable value is {len} bytes, expected 8 for a u64")]
    WrongLength {
        /// Actual length of the stored value.
        len: usize,
    },

    /// Another process holds the directory lock.
    #[error("WAL directory locked: another process has exclusive access")]
    Locked,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Entry codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl WalError {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true for [`WalError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns true if the error reports damaged data rather than a missing
    /// entry or an environmental failure.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::ChecksumMismatch { .. } | Self::Codec(_)
        )
    }

    /// Returns true if the error is a file-not-found from the filesystem.
    #[must_use]
    pub fn is_missing_file(&self) -> bool {
        match self {
            Self::Io(e) | Self::Storage(StorageError::Io(e)) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
