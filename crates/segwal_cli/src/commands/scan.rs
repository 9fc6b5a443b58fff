//! Read-only segment scanning shared by `verify` and `dump`.
//!
//! Nothing here writes: a torn tail is reported, not repaired, and the
//! directory lock is not taken, so the tools work next to a running WAL.

use crate::CliError;
use segwal_core::segment::format::{
    decode_index_block, scan_frames, FrameHeader, ScanStop, SegmentHeader, FRAME_HEADER_SIZE,
    HEADER_SIZE,
};
use segwal_core::{segment_file_name, SegmentInfo};
use segwal_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// One frame found in a segment.
#[derive(Debug)]
pub struct ScannedFrame {
    /// Log index stored in the frame header.
    pub index: u64,
    /// Offset of the frame header in the file.
    pub offset: u64,
    /// Payload bytes, or why they could not be read.
    pub payload: Result<Vec<u8>, CliError>,
}

/// What a scan of one segment file found.
#[derive(Debug)]
pub struct SegmentScan {
    /// Decoded header.
    pub header: SegmentHeader,
    /// File size in bytes.
    pub size: u64,
    /// Frames within the descriptor's live range, in index order.
    pub frames: Vec<ScannedFrame>,
    /// Bytes after the last valid frame of an unsealed segment.
    pub trailing: Option<String>,
}

/// Scans the segment described by `info` in `dir`.
///
/// Sealed segments are read through their index block, so one damaged frame
/// does not hide the ones after it. The tail is scanned forward until the
/// first frame that does not check out.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, its header is damaged or
/// names another segment, or a sealed segment's index block is unusable.
pub fn scan_segment(dir: &Path, info: &SegmentInfo) -> Result<SegmentScan, CliError> {
    let path = dir.join(segment_file_name(info.base_index, info.id));
    let backend = FileBackend::open_read_only(&path).map_err(|source| CliError::Open {
        path: path.clone(),
        source,
    })?;
    let size = backend.size()?;
    if size < HEADER_SIZE as u64 {
        return Err(CliError::ShortSegment { size });
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    backend.read_at(0, &mut header_bytes)?;
    let header = SegmentHeader::decode(&header_bytes)?;
    if header.segment_id != info.id || header.base_index != info.base_index {
        return Err(CliError::HeaderMismatch {
            found_id: header.segment_id,
            found_base: header.base_index,
            id: info.id,
            base: info.base_index,
        });
    }

    let mut scan = SegmentScan {
        header,
        size,
        frames: Vec::new(),
        trailing: None,
    };
    if info.is_sealed() {
        scan_sealed(&backend, info, &mut scan)?;
    } else {
        scan_tail(&backend, info, &mut scan)?;
    }
    Ok(scan)
}

fn in_range(info: &SegmentInfo, index: u64) -> bool {
    index >= info.min_index && (info.max_index == 0 || index <= info.max_index)
}

fn scan_sealed(
    backend: &dyn StorageBackend,
    info: &SegmentInfo,
    scan: &mut SegmentScan,
) -> Result<(), CliError> {
    if info.index_start < HEADER_SIZE as u64 || info.index_start >= scan.size {
        return Err(CliError::IndexOutOfRange {
            offset: info.index_start,
            size: scan.size,
        });
    }
    let len = usize::try_from(scan.size - info.index_start).map_err(|_| {
        CliError::IndexOutOfRange {
            offset: info.index_start,
            size: scan.size,
        }
    })?;
    let mut block = vec![0u8; len];
    backend.read_at(info.index_start, &mut block)?;
    let offsets = decode_index_block(&block, info.base_index, info.index_start)?;

    for (index, offset) in (info.base_index..).zip(offsets) {
        if !in_range(info, index) {
            continue;
        }
        let payload = read_frame(backend, offset, info.index_start).and_then(|(h, payload)| {
            if h.index == index {
                Ok(payload)
            } else {
                Err(CliError::FrameIndexMismatch {
                    expected: index,
                    found: h.index,
                })
            }
        });
        scan.frames.push(ScannedFrame {
            index,
            offset,
            payload,
        });
    }
    Ok(())
}

fn scan_tail(
    backend: &dyn StorageBackend,
    info: &SegmentInfo,
    scan: &mut SegmentScan,
) -> Result<(), CliError> {
    let frames = &mut scan.frames;
    let walked = scan_frames(backend, info.base_index, |index, offset, payload| {
        if in_range(info, index) {
            frames.push(ScannedFrame {
                index,
                offset,
                payload: Ok(payload.to_vec()),
            });
        }
    })?;
    if walked.stop != ScanStop::End {
        scan.trailing = Some(format!(
            "{} bytes at {} not recoverable: {}",
            scan.size - walked.end,
            walked.end,
            walked.stop
        ));
    }
    Ok(())
}

/// Reads and checks the frame at `offset`, which must end before `limit`.
fn read_frame(
    backend: &dyn StorageBackend,
    offset: u64,
    limit: u64,
) -> Result<(FrameHeader, Vec<u8>), CliError> {
    let out_of_bounds = CliError::FrameOutOfBounds { offset, limit };
    if offset + FRAME_HEADER_SIZE as u64 > limit {
        return Err(out_of_bounds);
    }
    let mut head = [0u8; FRAME_HEADER_SIZE];
    backend.read_at(offset, &mut head)?;
    let header = FrameHeader::parse(&head);
    let end = offset + FRAME_HEADER_SIZE as u64 + u64::from(header.len);
    if header.is_index_block() || end > limit {
        return Err(out_of_bounds);
    }
    let mut payload = vec![0u8; header.len as usize];
    backend.read_at(offset + FRAME_HEADER_SIZE as u64, &mut payload)?;
    header.verify(&payload)?;
    Ok((header, payload))
}
