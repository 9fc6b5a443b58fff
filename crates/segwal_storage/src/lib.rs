//! # segwal Storage
//!
//! Storage backend trait and implementations for segwal.
//!
//! Backends are **opaque byte stores**: they never interpret the segment
//! format written through them. The segment layer owns framing, checksums
//! and the trailing index block.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (positional read, append, sync, truncate)
//! - Must be `Send + Sync` so a tail segment can serve readers while it is written
//! - `sync` is the durability barrier; nothing is durable before it returns
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - Persistent storage using OS file APIs
//! - [`InMemoryBackend`] - Shareable in-memory store for tests and crash simulation
//!
//! ## Example
//!
//! ```rust
//! use segwal_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let mut buf = [0u8; 5];
//! backend.read_at(offset + 6, &mut buf).unwrap();
//! assert_eq!(&buf, b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
