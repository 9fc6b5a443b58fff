//! Built-in binary codec.
//!
//! ## Entry Format
//!
//! ```text
//! | index (uvarint) | epoch (uvarint) | type (uvarint) |
//! | data_len (uvarint) | data (N) | ext_len (uvarint) | ext (M) |
//! | secs since epoch (i64 LE) | nanos (u32 LE) |
//! ```

use crate::entry::{LogEntry, LogType};
use crate::error::{CodecError, CodecResult};
use crate::{Codec, CODEC_BINARY_V1};
use bytes::{Buf, BufMut};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum encoded length of a u64 as a uvarint.
const MAX_VARINT_LEN: usize = 10;

/// Size of the encoded timestamp.
const TIMESTAMP_LEN: usize = 12;

/// Compact varint codec, the default for new segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn id(&self) -> u64 {
        CODEC_BINARY_V1
    }

    fn encode(&self, entry: &LogEntry, out: &mut Vec<u8>) -> CodecResult<()> {
        out.reserve(
            5 * MAX_VARINT_LEN + entry.data.len() + entry.extensions.len() + TIMESTAMP_LEN,
        );
        put_uvarint(out, entry.index);
        put_uvarint(out, entry.epoch);
        put_uvarint(out, u64::from(entry.log_type.as_byte()));
        put_uvarint(out, entry.data.len() as u64);
        out.put_slice(&entry.data);
        put_uvarint(out, entry.extensions.len() as u64);
        out.put_slice(&entry.extensions);

        let (secs, nanos) = split_timestamp(entry.append_time);
        out.put_i64_le(secs);
        out.put_u32_le(nanos);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<LogEntry> {
        let mut buf = bytes;

        let index = get_uvarint(&mut buf)?;
        let epoch = get_uvarint(&mut buf)?;
        let raw_type = get_uvarint(&mut buf)?;
        let log_type = u8::try_from(raw_type)
            .map(LogType::from_byte)
            .map_err(|_| CodecError::corrupt(format!("type tag {raw_type} out of range")))?;
        let data = get_bytes(&mut buf)?;
        let extensions = get_bytes(&mut buf)?;

        if buf.remaining() < TIMESTAMP_LEN {
            return Err(CodecError::ShortBuffer);
        }
        let secs = buf.get_i64_le();
        let nanos = buf.get_u32_le();
        let append_time = join_timestamp(secs, nanos)?;

        if buf.has_remaining() {
            return Err(CodecError::corrupt(format!(
                "{} trailing bytes after entry",
                buf.remaining()
            )));
        }

        Ok(LogEntry {
            index,
            epoch,
            log_type,
            data,
            extensions,
            append_time,
        })
    }
}

/// Appends `value` as an unsigned LEB128 varint.
#[allow(clippy::cast_possible_truncation)]
fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

fn get_uvarint(buf: &mut &[u8]) -> CodecResult<u64> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(CodecError::ShortBuffer);
        }
        let byte = buf.get_u8();
        // The tenth byte may only carry the top bit of a u64.
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(CodecError::corrupt("varint overflows u64"));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::corrupt("varint overflows u64"))
}

fn get_bytes(buf: &mut &[u8]) -> CodecResult<Vec<u8>> {
    let len = get_uvarint(buf)?;
    let len = usize::try_from(len).map_err(|_| CodecError::ShortBuffer)?;
    if buf.remaining() < len {
        return Err(CodecError::ShortBuffer);
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Splits a time into whole seconds relative to the Unix epoch (floored) and
/// a non-negative nanosecond remainder.
#[allow(clippy::cast_possible_wrap)]
fn split_timestamp(time: SystemTime) -> (i64, u32) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => {
            let d = e.duration();
            if d.subsec_nanos() == 0 {
                (-(d.as_secs() as i64), 0)
            } else {
                (-(d.as_secs() as i64) - 1, 1_000_000_000 - d.subsec_nanos())
            }
        }
    }
}

fn join_timestamp(secs: i64, nanos: u32) -> CodecResult<SystemTime> {
    if nanos >= 1_000_000_000 {
        return Err(CodecError::corrupt(format!("timestamp nanos {nanos} out of range")));
    }
    let base = if secs >= 0 {
        UNIX_EPOCH.checked_add(Duration::from_secs(secs.unsigned_abs()))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(secs.unsigned_abs()))
    };
    base.and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nanos))))
        .ok_or_else(|| CodecError::corrupt("timestamp out of range"))
}
