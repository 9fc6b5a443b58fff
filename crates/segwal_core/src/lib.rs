//! # segwal Core
//!
//! Segmented write-ahead log for replicated state machines.
//!
//! This crate provides:
//! - [`Wal`], an append-only log of [`LogEntry`]s split across segment files
//! - Crash recovery that repairs a torn tail and drops orphaned segments
//! - Prefix and suffix truncation without rewriting segment files
//! - A stable key/value store for small durable scalars
//! - Pluggable catalog ([`MetaStore`]) and segment ([`SegmentFiler`]) storage
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segwal_core::{LogEntry, Options, Wal};
//!
//! let wal = Wal::open("data/wal", Options::default())?;
//! wal.store_log(&LogEntry::new(1, 1, b"a".to_vec()))?;
//! wal.set_u64(b"term", 7)?;
//!
//! assert_eq!(wal.get_log(1)?.data, b"a");
//! wal.close()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod meta;
pub mod segment;
mod state;
mod stats;
mod wal;

pub use config::{Options, DEFAULT_SEGMENT_SIZE, MIN_SEGMENT_SIZE};
pub use dir::{parse_segment_file_name, segment_file_name, DirLock, LOCK_FILE, META_FILE};
pub use error::{WalError, WalResult};
pub use meta::{FileMetaStore, InMemoryMetaStore, MetaStore, PersistentState, SegmentInfo};
pub use segment::{
    BufferPool, EncodedEntry, FileSegmentFiler, MemorySegmentFiler, PooledBuffer, SegmentFile,
    SegmentFiler, SegmentReader, SegmentWriter,
};
pub use stats::{names as metric_names, AtomicMetrics, MetricsCollector, MetricsSnapshot, NoopMetrics};
pub use wal::Wal;

// Re-export the entry types so users need only this crate.
pub use segwal_codec::{
    BinaryCodec, CborCodec, Codec, CodecError, LogEntry, LogType, CODEC_BINARY_V1, CODEC_CBOR_V1,
    FIRST_EXTERNAL_CODEC_ID,
};
