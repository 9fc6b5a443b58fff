//! Dump command implementation.

use super::scan::scan_segment;
use crate::CliError;
use segwal_codec::builtin_codec;
use segwal_core::FileMetaStore;
use serde::Serialize;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Log entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Log index.
    pub index: u64,
    /// Segment holding the entry.
    pub segment_id: u64,
    /// Offset of the frame in the segment file.
    pub offset: u64,
    /// Epoch, if the entry could be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    /// Log type byte, if the entry could be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_type: Option<u8>,
    /// Append time in milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_time_ms: Option<u128>,
    /// Payload size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_size: Option<usize>,
    /// First bytes of the payload, hex-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_prefix: Option<String>,
    /// Why the entry could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collects up to `limit` entries starting at index `from`.
pub fn read_entries(
    path: &Path,
    from: u64,
    limit: Option<usize>,
) -> Result<Vec<EntryInfo>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(CliError::NoWal(path.to_path_buf()).into());
    }
    let catalog = FileMetaStore::read_catalog(path)?;
    let max_entries = limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();

    for info in &catalog.segments {
        if entries.len() >= max_entries {
            break;
        }
        if info.is_sealed() && info.max_index < from {
            continue;
        }
        let scan = scan_segment(path, info)?;
        let codec = builtin_codec(info.codec);

        for frame in scan.frames.iter().filter(|f| f.index >= from) {
            if entries.len() >= max_entries {
                break;
            }
            let mut out = EntryInfo {
                index: frame.index,
                segment_id: info.id,
                offset: frame.offset,
                epoch: None,
                log_type: None,
                append_time_ms: None,
                data_size: None,
                data_prefix: None,
                error: None,
            };
            match (&frame.payload, &codec) {
                (Err(e), _) => out.error = Some(e.to_string()),
                (Ok(bytes), None) => {
                    out.data_size = Some(bytes.len());
                    out.data_prefix = Some(hex_prefix(bytes));
                }
                (Ok(bytes), Some(codec)) => match codec.decode(bytes) {
                    Ok(entry) => {
                        out.epoch = Some(entry.epoch);
                        out.log_type = Some(entry.log_type.as_byte());
                        out.append_time_ms = entry
                            .append_time
                            .duration_since(UNIX_EPOCH)
                            .ok()
                            .map(|d| d.as_millis());
                        out.data_size = Some(entry.data.len());
                        out.data_prefix = Some(hex_prefix(&entry.data));
                    }
                    Err(e) => out.error = Some(e.to_string()),
                },
            }
            entries.push(out);
        }
    }

    Ok(entries)
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    from: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = read_entries(path, from, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

fn print_text_output(entries: &[EntryInfo]) {
    println!("Log Entries ({} total)", entries.len());
    println!("================");
    println!();

    for e in entries {
        print!("[{:>10}] seg={:<6} off={:<10}", e.index, e.segment_id, e.offset);
        if let Some(epoch) = e.epoch {
            print!(" epoch={}", epoch);
        }
        if let Some(t) = e.log_type {
            print!(" type={}", t);
        }
        if let Some(size) = e.data_size {
            print!(" data={} bytes", size);
        }
        if let Some(ref prefix) = e.data_prefix {
            if !prefix.is_empty() {
                print!(" [{}]", prefix);
            }
        }
        if let Some(ref err) = e.error {
            print!(" ERROR: {}", err);
        }
        println!();
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(16).map(|b| format!("{:02x}", b)).collect()
}
