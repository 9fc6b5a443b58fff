//! Log entry types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Type tag attached to a log entry by the caller.
///
/// The WAL never interprets the tag; the constants mirror the entry kinds a
/// replication library typically writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogType(u8);

impl LogType {
    /// An application command.
    pub const COMMAND: Self = Self(0);
    /// A no-op written by a new leader.
    pub const NOOP: Self = Self(1);
    /// A barrier entry.
    pub const BARRIER: Self = Self(4);
    /// A membership configuration entry.
    pub const CONFIGURATION: Self = Self(5);

    /// Creates a type tag from a raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }
}

/// A single entry of the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log. Strictly increasing, gap free.
    pub index: u64,
    /// Term/era marker, opaque to the WAL.
    pub epoch: u64,
    /// Caller-defined type tag.
    pub log_type: LogType,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Extension bytes, opaque to the WAL.
    pub extensions: Vec<u8>,
    /// When the entry was first appended by the caller.
    pub append_time: SystemTime,
}

impl LogEntry {
    /// Creates a command entry stamped with the current time.
    #[must_use]
    pub fn new(index: u64, epoch: u64, data: Vec<u8>) -> Self {
        Self {
            index,
            epoch,
            log_type: LogType::COMMAND,
            data,
            extensions: Vec::new(),
            append_time: SystemTime::now(),
        }
    }

    /// Sets the type tag.
    #[must_use]
    pub fn with_type(mut self, log_type: LogType) -> Self {
        self.log_type = log_type;
        self
    }

    /// Sets the extension bytes.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<u8>) -> Self {
        self.extensions = extensions;
        self
    }
}

impl Default for LogEntry {
    fn default() -> Self {
        Self {
            index: 0,
            epoch: 0,
            log_type: LogType::COMMAND,
            data: Vec::new(),
            extensions: Vec::new(),
            append_time: UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_type_bytes() {
        assert_eq!(LogType::from_byte(5), LogType::CONFIGURATION);
        assert_eq!(LogType::BARRIER.as_byte(), 4);
        assert_eq!(LogType::default(), LogType::COMMAND);
    }

    #[test]
    fn builder_helpers() {
        let entry = LogEntry::new(3, 2, b"x".to_vec())
            .with_type(LogType::NOOP)
            .with_extensions(vec![9]);
        assert_eq!(entry.index, 3);
        assert_eq!(entry.epoch, 2);
        assert_eq!(entry.log_type, LogType::NOOP);
        assert_eq!(entry.extensions, vec![9]);
    }
}
