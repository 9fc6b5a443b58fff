//! Verify command implementation.

use super::scan::scan_segment;
use crate::CliError;
use segwal_codec::builtin_codec;
use segwal_core::{FileMetaStore, SegmentInfo};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Verification result.
#[derive(Debug, Default, Serialize)]
pub struct VerifyResult {
    /// Number of segments checked.
    pub segments_checked: usize,
    /// Number of entries checked.
    pub entries_checked: usize,
    /// Number of entries that read and decoded cleanly.
    pub valid_entries: usize,
    /// Number of damaged entries.
    pub corrupt_entries: usize,
    /// Problems that make the log unusable.
    pub errors: Vec<String>,
    /// Problems that the next open repairs on its own.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_entries == 0 && self.errors.is_empty()
    }
}

/// Checks every segment the catalog lists.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(CliError::NoWal(path.to_path_buf()).into());
    }
    let catalog = FileMetaStore::read_catalog(path)?;
    let mut result = VerifyResult::default();

    let mut prev: Option<&SegmentInfo> = None;
    for (i, info) in catalog.segments.iter().enumerate() {
        result.segments_checked += 1;
        let last = i + 1 == catalog.segments.len();
        if !info.is_sealed() && !last {
            result
                .errors
                .push(format!("segment {} is unsealed but not the newest", info.id));
        }
        if let Some(p) = prev {
            if p.max_index + 1 != info.base_index {
                result.errors.push(format!(
                    "gap between segment {} (ends at {}) and segment {} (starts at {})",
                    p.id, p.max_index, info.id, info.base_index
                ));
            }
        }
        prev = Some(info);
        verify_segment(path, info, &mut result);
    }

    Ok(result)
}

fn verify_segment(path: &Path, info: &SegmentInfo, result: &mut VerifyResult) {
    debug!(segment_id = info.id, sealed = info.is_sealed(), "verifying segment");
    let scan = match scan_segment(path, info) {
        Ok(scan) => scan,
        Err(e @ CliError::ShortSegment { .. }) if !info.is_sealed() => {
            result
                .warnings
                .push(format!("tail segment {}: {e}", info.id));
            return;
        }
        Err(e) => {
            result.errors.push(format!("segment {}: {e}", info.id));
            return;
        }
    };
    if scan.header.codec_id != info.codec {
        result.errors.push(format!(
            "segment {} header codec {} differs from catalog codec {}",
            info.id, scan.header.codec_id, info.codec
        ));
    }
    if let Some(trailing) = &scan.trailing {
        result
            .warnings
            .push(format!("tail segment {}: {trailing}", info.id));
    }

    let codec = builtin_codec(info.codec);
    if codec.is_none() {
        result.warnings.push(format!(
            "segment {} uses external codec {}, entries checked by checksum only",
            info.id, info.codec
        ));
    }

    for frame in &scan.frames {
        result.entries_checked += 1;
        let decoded = frame.payload.as_ref().map_err(ToString::to_string).and_then(|bytes| {
            match &codec {
                Some(codec) => codec
                    .decode(bytes)
                    .map_err(|e| e.to_string())
                    .and_then(|entry| {
                        if entry.index == frame.index {
                            Ok(())
                        } else {
                            Err(format!("entry decodes as index {}", entry.index))
                        }
                    }),
                None => Ok(()),
            }
        });
        match decoded {
            Ok(()) => result.valid_entries += 1,
            Err(e) => {
                result.corrupt_entries += 1;
                result.errors.push(format!(
                    "segment {} index {} at offset {}: {e}",
                    info.id, frame.index, frame.offset
                ));
            }
        }
    }

    if info.is_sealed() {
        let expected = (info.max_index + 1).saturating_sub(info.min_index);
        if scan.frames.len() as u64 != expected {
            result.errors.push(format!(
                "segment {} holds {} live entries, catalog expects {expected}",
                info.id,
                scan.frames.len()
            ));
        }
    }
}

/// Runs the verify command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = verify(path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(path, &result),
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(CliError::VerificationFailed(result.errors.len()).into())
    }
}

fn print_text_output(path: &Path, result: &VerifyResult) {
    println!("Verifying WAL at {:?}", path);
    println!();
    println!(
        "  segments: {}, entries checked: {}, valid: {}, corrupt: {}",
        result.segments_checked,
        result.entries_checked,
        result.valid_entries,
        result.corrupt_entries
    );
    for warning in &result.warnings {
        println!("    WARNING: {}", warning);
    }
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }
    println!();
    if result.is_ok() {
        println!("✓ WAL verification passed");
    } else {
        println!("✗ WAL verification failed");
    }
}
