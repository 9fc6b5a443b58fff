//! # segwal Codec
//!
//! Log entry types and the pluggable codecs that turn them into bytes.
//!
//! A codec is identified by a stable 64-bit ID that is recorded in every
//! segment header, so a log written by one codec stays readable after the
//! configured codec changes. IDs below [`FIRST_EXTERNAL_CODEC_ID`] belong to
//! codecs shipped in this crate; codecs defined elsewhere must use IDs at or
//! above it.
//!
//! ## Usage
//!
//! ```
//! use segwal_codec::{BinaryCodec, Codec, LogEntry};
//!
//! let entry = LogEntry::new(1, 1, b"a".to_vec());
//! let mut buf = Vec::new();
//! BinaryCodec.encode(&entry, &mut buf).unwrap();
//!
//! let decoded = BinaryCodec.decode(&buf).unwrap();
//! assert_eq!(entry, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binary;
mod cbor;
mod entry;
mod error;

pub use binary::BinaryCodec;
pub use cbor::CborCodec;
pub use entry::{LogEntry, LogType};
pub use error::{CodecError, CodecResult};

use std::fmt;

/// ID of the built-in varint binary codec.
pub const CODEC_BINARY_V1: u64 = 1;

/// ID of the built-in CBOR codec.
pub const CODEC_CBOR_V1: u64 = 2;

/// Lowest ID available to codecs defined outside this crate.
pub const FIRST_EXTERNAL_CODEC_ID: u64 = 1 << 16;

/// Translates log entries to and from bytes.
///
/// Implementations must be deterministic for a given entry and must not keep
/// references into the slice passed to [`Codec::decode`]: the caller recycles
/// that buffer as soon as `decode` returns.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Stable identifier recorded in segment headers.
    fn id(&self) -> u64;

    /// Appends the encoding of `entry` to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be represented.
    fn encode(&self, entry: &LogEntry, out: &mut Vec<u8>) -> CodecResult<()>;

    /// Decodes a single entry from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ShortBuffer`] for truncated input and
    /// [`CodecError::Corrupt`] for malformed input.
    fn decode(&self, bytes: &[u8]) -> CodecResult<LogEntry>;
}

/// Returns true if `id` lies in the range reserved for built-in codecs.
#[must_use]
pub const fn is_internal_codec_id(id: u64) -> bool {
    id < FIRST_EXTERNAL_CODEC_ID
}

/// Returns the built-in codec registered under `id`, if any.
#[must_use]
pub fn builtin_codec(id: u64) -> Option<std::sync::Arc<dyn Codec>> {
    match id {
        CODEC_BINARY_V1 => Some(std::sync::Arc::new(BinaryCodec)),
        CODEC_CBOR_V1 => Some(std::sync::Arc::new(CborCodec)),
        _ => None,
    }
}
