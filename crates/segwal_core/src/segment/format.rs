//! Segment file format.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ header (40 bytes)                                            │
//! │   magic "SWAL" | version u16 | reserved u16 | segment id u64 │
//! │   base index u64 | codec id u64 | reserved u32 | crc32 u32   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ frame: len u32 | index u64 | crc32 u32 | encoded entry ...   │
//! │ frame: ...                                                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ index block (sealed only)                                    │
//! │   marker u32 = 0xFFFFFFFF | count u32                        │
//! │   (index u64, offset u64) * count | crc32 u32                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The frame CRC covers the length, the
//! index and the payload. The index block marker occupies the frame length
//! slot, so a forward scan can tell the two apart.

use crate::error::{WalError, WalResult};
use segwal_storage::StorageBackend;
use std::fmt;

/// Magic bytes identifying a segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SWAL";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// Size of the segment header in bytes.
pub const HEADER_SIZE: usize = 40;

/// Size of a frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Value in the frame length slot that introduces the index block.
pub const INDEX_BLOCK_MARKER: u32 = u32::MAX;

/// Largest payload a single frame can carry.
pub const MAX_FRAME_PAYLOAD: usize = (INDEX_BLOCK_MARKER - 1) as usize;

/// Fixed bytes of an index block besides its entries (marker, count, crc).
const INDEX_BLOCK_OVERHEAD: usize = 12;

/// Bytes per index block entry.
const INDEX_BLOCK_ENTRY_SIZE: usize = 16;

/// Computes a CRC32 over several slices.
pub(crate) fn checksum(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// The fixed header at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Segment ID.
    pub segment_id: u64,
    /// Index of the first entry the segment may hold.
    pub base_index: u64,
    /// Codec used for every entry in the segment.
    pub codec_id: u64,
}

impl SegmentHeader {
    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.segment_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.base_index.to_le_bytes());
        buf[24..32].copy_from_slice(&self.codec_id.to_le_bytes());
        let crc = checksum(&[&buf[..36]]);
        buf[36..40].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and validates a header.
    ///
    /// # Errors
    ///
    /// Returns a corruption error on a short buffer, wrong magic, unknown
    /// version or checksum mismatch.
    pub fn decode(bytes: &[u8]) -> WalResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(WalError::corrupt(format!(
                "segment header too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != SEGMENT_MAGIC {
            return Err(WalError::corrupt("invalid segment magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != SEGMENT_VERSION {
            return Err(WalError::corrupt(format!(
                "unsupported segment version: {version}"
            )));
        }
        let expected = read_u32(bytes, 36);
        let actual = checksum(&[&bytes[..36]]);
        if expected != actual {
            return Err(WalError::ChecksumMismatch { expected, actual });
        }
        Ok(Self {
            segment_id: read_u64(bytes, 8),
            base_index: read_u64(bytes, 16),
            codec_id: read_u64(bytes, 24),
        })
    }
}

/// The fixed prefix of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length, or [`INDEX_BLOCK_MARKER`].
    pub len: u32,
    /// Log index stored in the frame.
    pub index: u64,
    /// CRC32 over length, index and payload.
    pub crc: u32,
}

impl FrameHeader {
    /// Parses a frame header from exactly [`FRAME_HEADER_SIZE`] bytes.
    #[must_use]
    pub fn parse(bytes: &[u8; FRAME_HEADER_SIZE]) -> Self {
        Self {
            len: read_u32(bytes, 0),
            index: read_u64(bytes, 4),
            crc: read_u32(bytes, 12),
        }
    }

    /// Returns true if this header is the start of an index block.
    #[must_use]
    pub fn is_index_block(&self) -> bool {
        self.len == INDEX_BLOCK_MARKER
    }

    /// Verifies the payload against the stored checksum.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::ChecksumMismatch`] on mismatch.
    pub fn verify(&self, payload: &[u8]) -> WalResult<()> {
        let actual = frame_checksum(self.len, self.index, payload);
        if actual != self.crc {
            return Err(WalError::ChecksumMismatch {
                expected: self.crc,
                actual,
            });
        }
        Ok(())
    }
}

fn frame_checksum(len: u32, index: u64, payload: &[u8]) -> u32 {
    checksum(&[&len.to_le_bytes(), &index.to_le_bytes(), payload])
}

/// Returns the on-disk size of a frame carrying `payload_len` bytes.
#[must_use]
pub const fn frame_size(payload_len: usize) -> usize {
    FRAME_HEADER_SIZE + payload_len
}

/// Appends a frame to `out`.
///
/// # Errors
///
/// Returns a corruption error if the payload does not fit in a frame.
pub fn encode_frame(out: &mut Vec<u8>, index: u64, payload: &[u8]) -> WalResult<()> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(WalError::corrupt(format!(
            "entry {index} is {} bytes, frames hold at most {MAX_FRAME_PAYLOAD}",
            payload.len()
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;
    out.reserve(frame_size(payload.len()));
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&frame_checksum(len, index, payload).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Returns the size of an index block with `count` entries.
#[must_use]
pub const fn index_block_size(count: usize) -> usize {
    INDEX_BLOCK_OVERHEAD + count * INDEX_BLOCK_ENTRY_SIZE
}

/// Encodes an index block for frames starting at `first_index`.
///
/// `offsets[i]` is the file offset of the frame holding `first_index + i`.
#[must_use]
pub fn encode_index_block(first_index: u64, offsets: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(index_block_size(offsets.len()));
    buf.extend_from_slice(&INDEX_BLOCK_MARKER.to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(offsets.len() as u32).to_le_bytes());
    for (i, offset) in offsets.iter().enumerate() {
        buf.extend_from_slice(&(first_index + i as u64).to_le_bytes());
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    let crc = checksum(&[&buf]);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Decodes an index block.
///
/// Returns the frame offsets in index order. Entries must be contiguous,
/// starting at `base_index`, with strictly increasing offsets that lie
/// between the header and the block itself.
///
/// # Errors
///
/// Returns a corruption error if the block is malformed or fails its
/// checksum.
pub fn decode_index_block(bytes: &[u8], base_index: u64, block_offset: u64) -> WalResult<Vec<u64>> {
    if bytes.len() < INDEX_BLOCK_OVERHEAD {
        return Err(WalError::corrupt("index block too short"));
    }
    if read_u32(bytes, 0) != INDEX_BLOCK_MARKER {
        return Err(WalError::corrupt("index block marker missing"));
    }
    let count = read_u32(bytes, 4) as usize;
    let size = index_block_size(count);
    if bytes.len() != size {
        return Err(WalError::corrupt(format!(
            "index block holds {count} entries but is {} bytes",
            bytes.len()
        )));
    }
    let expected = read_u32(bytes, size - 4);
    let actual = checksum(&[&bytes[..size - 4]]);
    if expected != actual {
        return Err(WalError::ChecksumMismatch { expected, actual });
    }

    let mut offsets = Vec::with_capacity(count);
    let mut min_offset = HEADER_SIZE as u64;
    for i in 0..count {
        let at = 8 + i * INDEX_BLOCK_ENTRY_SIZE;
        let index = read_u64(bytes, at);
        let offset = read_u64(bytes, at + 8);
        if index != base_index + i as u64 {
            return Err(WalError::corrupt(format!(
                "index block entry {i} names index {index}, expected {}",
                base_index + i as u64
            )));
        }
        if offset < min_offset || offset >= block_offset {
            return Err(WalError::corrupt(format!(
                "index block entry for {index} points outside the frame area: {offset}"
            )));
        }
        min_offset = offset + FRAME_HEADER_SIZE as u64;
        offsets.push(offset);
    }
    Ok(offsets)
}

/// Why a forward frame scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    /// Every byte was consumed.
    End,
    /// Fewer bytes remain than the next frame needs.
    Truncated,
    /// An index block starts at the stop offset.
    IndexBlock,
    /// The next frame holds `found` instead of the next index.
    OutOfSequence {
        /// Index stored in the frame.
        found: u64,
    },
    /// The next frame fails its checksum.
    BadChecksum,
}

impl fmt::Display for ScanStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::End => write!(f, "end of file"),
            Self::Truncated => write!(f, "truncated frame"),
            Self::IndexBlock => write!(f, "index block"),
            Self::OutOfSequence { found } => write!(f, "frame out of sequence (index {found})"),
            Self::BadChecksum => write!(f, "frame checksum mismatch"),
        }
    }
}

/// Outcome of [`scan_frames`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameScan {
    /// Offsets of the valid frames, in index order.
    pub offsets: Vec<u64>,
    /// Offset just past the last valid frame.
    pub end: u64,
    /// Why the scan stopped at `end`.
    pub stop: ScanStop,
}

/// Walks the frames of a segment forward from the header.
///
/// The first frame must hold `first_index` and each following one the next
/// index. `visit(index, offset, payload)` is called for every frame that
/// checks out. The walk stops at the first frame that is truncated, out of
/// sequence, fails its checksum or is an index block.
///
/// # Errors
///
/// Returns an error only if the backend fails; damaged frames end the scan.
pub fn scan_frames<F>(
    backend: &dyn StorageBackend,
    first_index: u64,
    mut visit: F,
) -> WalResult<FrameScan>
where
    F: FnMut(u64, u64, &[u8]),
{
    let size = backend.size()?;
    let mut offsets = Vec::new();
    let mut pos = HEADER_SIZE as u64;
    let mut expected = first_index;
    let mut head = [0u8; FRAME_HEADER_SIZE];
    let mut payload = Vec::new();

    let stop = loop {
        if pos == size {
            break ScanStop::End;
        }
        if pos + FRAME_HEADER_SIZE as u64 > size {
            break ScanStop::Truncated;
        }
        backend.read_at(pos, &mut head)?;
        let frame = FrameHeader::parse(&head);
        if frame.is_index_block() {
            break ScanStop::IndexBlock;
        }
        if frame.index != expected {
            break ScanStop::OutOfSequence { found: frame.index };
        }
        let end = pos + FRAME_HEADER_SIZE as u64 + u64::from(frame.len);
        if end > size {
            break ScanStop::Truncated;
        }
        payload.resize(frame.len as usize, 0);
        backend.read_at(pos + FRAME_HEADER_SIZE as u64, &mut payload)?;
        if frame.verify(&payload).is_err() {
            break ScanStop::BadChecksum;
        }
        visit(frame.index, pos, &payload);
        offsets.push(pos);
        pos = end;
        expected += 1;
    };

    Ok(FrameScan {
        offsets,
        end: pos,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use segwal_storage::InMemoryBackend;

    fn header() -> SegmentHeader {
        SegmentHeader {
            segment_id: 3,
            base_index: 101,
            codec_id: 1,
        }
    }

    #[test]
    fn header_round_trip() {
        let bytes = header().encode();
        assert_eq!(&bytes[0..4], b"SWAL");
        assert_eq!(SegmentHeader::decode(&bytes).unwrap(), header());
    }

    #[test]
    fn header_bit_flip_is_detected() {
        let mut bytes = header().encode();
        bytes[17] ^= 0x01;
        let err = SegmentHeader::decode(&bytes).unwrap_err();
        assert!(matches!(err, WalError::ChecksumMismatch { .. }));
    }

    #[test]
    fn header_wrong_magic() {
        let mut bytes = header().encode();
        bytes[0] = b'X';
        assert!(SegmentHeader::decode(&bytes).unwrap_err().is_corrupt());
    }

    #[test]
    fn header_too_short() {
        let bytes = header().encode();
        assert!(SegmentHeader::decode(&bytes[..20]).is_err());
    }

    #[test]
    fn frame_layout_and_verify() {
        let mut out = Vec::new();
        encode_frame(&mut out, 42, b"payload").unwrap();
        assert_eq!(out.len(), frame_size(7));

        let mut head = [0u8; FRAME_HEADER_SIZE];
        head.copy_from_slice(&out[..FRAME_HEADER_SIZE]);
        let frame = FrameHeader::parse(&head);
        assert_eq!(frame.len, 7);
        assert_eq!(frame.index, 42);
        assert!(!frame.is_index_block());
        frame.verify(&out[FRAME_HEADER_SIZE..]).unwrap();
    }

    #[test]
    fn frame_corrupt_payload_fails_verify() {
        let mut out = Vec::new();
        encode_frame(&mut out, 1, b"abc").unwrap();

        let mut head = [0u8; FRAME_HEADER_SIZE];
        head.copy_from_slice(&out[..FRAME_HEADER_SIZE]);
        let frame = FrameHeader::parse(&head);
        assert!(frame.verify(b"abd").is_err());
    }

    #[test]
    fn index_block_round_trip() {
        let offsets = vec![40, 60, 95];
        let block = encode_index_block(7, &offsets);
        assert_eq!(block.len(), index_block_size(3));

        let mut head = [0u8; FRAME_HEADER_SIZE];
        head.copy_from_slice(&block[..FRAME_HEADER_SIZE]);
        assert!(FrameHeader::parse(&head).is_index_block());

        assert_eq!(decode_index_block(&block, 7, 200).unwrap(), offsets);
    }

    #[test]
    fn empty_index_block() {
        let block = encode_index_block(1, &[]);
        assert!(decode_index_block(&block, 1, HEADER_SIZE as u64)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn index_block_rejects_wrong_base() {
        let block = encode_index_block(7, &[40, 60]);
        assert!(decode_index_block(&block, 8, 200).is_err());
    }

    #[test]
    fn index_block_rejects_offsets_past_block() {
        let block = encode_index_block(1, &[40, 300]);
        assert!(decode_index_block(&block, 1, 200).is_err());
    }

    #[test]
    fn index_block_checksum() {
        let mut block = encode_index_block(1, &[40]);
        block[10] ^= 0xFF;
        assert!(decode_index_block(&block, 1, 200).unwrap_err().is_corrupt());
    }

    /// Header followed by frames for `first..first + payloads.len()`.
    fn segment_bytes(first: u64, payloads: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = header().encode().to_vec();
        for (i, payload) in payloads.iter().enumerate() {
            encode_frame(&mut bytes, first + i as u64, payload).unwrap();
        }
        bytes
    }

    #[test]
    fn scan_visits_every_frame() {
        let payloads = vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()];
        let bytes = segment_bytes(101, &payloads);
        let backend = InMemoryBackend::with_data(bytes.clone());

        let mut seen = Vec::new();
        let scan = scan_frames(&backend, 101, |index, _, payload| {
            seen.push((index, payload.to_vec()));
        })
        .unwrap();

        assert_eq!(scan.stop, ScanStop::End);
        assert_eq!(scan.end, bytes.len() as u64);
        assert_eq!(scan.offsets, vec![40, 57, 75]);
        let expected: Vec<(u64, Vec<u8>)> = (101..).zip(payloads).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn scan_stops_at_index_block() {
        let mut bytes = segment_bytes(101, &[b"a".to_vec()]);
        let frames_end = bytes.len() as u64;
        bytes.extend_from_slice(&encode_index_block(101, &[40]));

        let scan = scan_frames(&InMemoryBackend::with_data(bytes), 101, |_, _, _| {}).unwrap();
        assert_eq!(scan.stop, ScanStop::IndexBlock);
        assert_eq!(scan.end, frames_end);
    }

    #[test]
    fn scan_stops_out_of_sequence() {
        let bytes = segment_bytes(101, &[b"a".to_vec()]);
        let scan = scan_frames(&InMemoryBackend::with_data(bytes), 100, |_, _, _| {}).unwrap();
        assert_eq!(scan.stop, ScanStop::OutOfSequence { found: 101 });
        assert_eq!(scan.end, HEADER_SIZE as u64);
        assert!(scan.offsets.is_empty());
    }

    proptest! {
        #[test]
        fn scan_keeps_the_intact_prefix(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..12),
            cut in any::<prop::sample::Index>(),
        ) {
            let bytes = segment_bytes(1, &payloads);
            let full = scan_frames(&InMemoryBackend::with_data(bytes.clone()), 1, |_, _, _| {})
                .unwrap();
            let cut = HEADER_SIZE + cut.index(bytes.len() - HEADER_SIZE);

            let torn = InMemoryBackend::with_data(bytes[..cut].to_vec());
            let torn = scan_frames(&torn, 1, |_, _, _| {}).unwrap();

            let whole = full
                .offsets
                .iter()
                .zip(&payloads)
                .filter(|(offset, payload)| **offset as usize + frame_size(payload.len()) <= cut)
                .count();
            prop_assert_eq!(torn.offsets.len(), whole);
            prop_assert_eq!(&torn.offsets[..], &full.offsets[..whole]);
            prop_assert!(torn.end as usize <= cut);
            if torn.end as usize == cut {
                prop_assert_eq!(torn.stop, ScanStop::End);
            } else {
                prop_assert_eq!(torn.stop, ScanStop::Truncated);
            }
        }

        #[test]
        fn scan_never_accepts_a_flipped_frame(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..8),
            at in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let mut bytes = segment_bytes(1, &payloads);
            let at = HEADER_SIZE + at.index(bytes.len() - HEADER_SIZE);
            bytes[at] ^= mask;

            let scan = scan_frames(&InMemoryBackend::with_data(bytes), 1, |_, _, _| {}).unwrap();
            prop_assert!(scan.end as usize <= at);
            prop_assert!(scan.offsets.len() < payloads.len());
        }
    }
}
