//! # segwal Testkit
//!
//! Test utilities for segwal.
//!
//! This crate provides:
//! - Test fixtures for file-backed and in-memory WALs
//! - Property-based test generators and a reference model of the log
//! - Crash injection for segment storage
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segwal_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_wal() {
//!     with_temp_wal(|wal| {
//!         wal.store_logs(&entries(1..=10, 32)).unwrap();
//!         assert_eq!(wal.last_index().unwrap(), 10);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
