//! Built-in CBOR codec.
//!
//! Encodes a [`LogEntry`] through its serde representation. Larger than the
//! binary codec but self-describing, which makes dumps of foreign logs easier
//! to inspect.

use crate::entry::LogEntry;
use crate::error::{CodecError, CodecResult};
use crate::{Codec, CODEC_CBOR_V1};

/// Serde/CBOR codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn id(&self) -> u64 {
        CODEC_CBOR_V1
    }

    fn encode(&self, entry: &LogEntry, out: &mut Vec<u8>) -> CodecResult<()> {
        ciborium::into_writer(entry, out).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<LogEntry> {
        ciborium::from_reader(bytes).map_err(|e| match e {
            ciborium::de::Error::Io(_) => CodecError::ShortBuffer,
            other => CodecError::corrupt(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogType;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample() -> LogEntry {
        LogEntry {
            index: 42,
            epoch: 3,
            log_type: LogType::BARRIER,
            data: vec![1, 2, 3],
            extensions: vec![],
            append_time: UNIX_EPOCH + Duration::new(1_000, 5),
        }
    }

    #[test]
    fn cbor_roundtrip() {
        let mut buf = Vec::new();
        CborCodec.encode(&sample(), &mut buf).unwrap();
        assert_eq!(CborCodec.decode(&buf).unwrap(), sample());
    }

    #[test]
    fn cbor_truncated_is_rejected() {
        let mut buf = Vec::new();
        CborCodec.encode(&sample(), &mut buf).unwrap();
        assert!(CborCodec.decode(&buf[..buf.len() / 2]).is_err());
    }

    #[test]
    fn cbor_garbage_is_rejected() {
        assert!(CborCodec.decode(&[0xff, 0x00, 0x13]).is_err());
    }
}
