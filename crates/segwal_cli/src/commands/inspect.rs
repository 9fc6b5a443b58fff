//! Inspect command implementation.

use crate::CliError;
use segwal_core::{segment_file_name, FileMetaStore, FileSegmentFiler, SegmentFiler, SegmentInfo};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// WAL inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// WAL directory.
    pub path: String,
    /// ID the next segment will get.
    pub next_segment_id: u64,
    /// First live index, 0 if empty.
    pub first_index: u64,
    /// Last index recorded in the catalog for sealed segments.
    pub last_sealed_index: u64,
    /// Total bytes across segment files.
    pub total_size: u64,
    /// Segments in base index order.
    pub segments: Vec<SegmentSummary>,
    /// Segment files present on disk but unknown to the catalog.
    pub orphans: Vec<String>,
}

/// One catalog entry.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    /// Segment ID.
    pub id: u64,
    /// First index the segment can hold.
    pub base_index: u64,
    /// First live index.
    pub min_index: u64,
    /// Last live index, 0 for the tail.
    pub max_index: u64,
    /// Whether the segment is sealed.
    pub sealed: bool,
    /// Codec ID.
    pub codec: u64,
    /// Configured size limit.
    pub size_limit: u32,
    /// File size, if the file exists.
    pub file_size: Option<u64>,
    /// Creation time in seconds since the epoch.
    pub created: u64,
    /// Seal time in seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<u64>,
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn summarize(dir: &Path, info: &SegmentInfo) -> SegmentSummary {
    let file_size = std::fs::metadata(dir.join(segment_file_name(info.base_index, info.id)))
        .ok()
        .map(|m| m.len());
    SegmentSummary {
        id: info.id,
        base_index: info.base_index,
        min_index: info.min_index,
        max_index: info.max_index,
        sealed: info.is_sealed(),
        codec: info.codec,
        size_limit: info.size_limit,
        file_size,
        created: epoch_secs(info.create_time),
        sealed_at: info.seal_time.map(epoch_secs),
    }
}

/// Builds the inspection result for `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(CliError::NoWal(path.to_path_buf()).into());
    }
    let catalog = FileMetaStore::read_catalog(path)?;
    let filer = FileSegmentFiler::new(path);

    let known: HashSet<u64> = catalog.segments.iter().map(|s| s.id).collect();
    let mut orphans: Vec<String> = filer
        .list()?
        .into_iter()
        .filter(|(id, _)| !known.contains(id))
        .map(|(id, base)| segment_file_name(base, id))
        .collect();
    orphans.sort();

    let segments: Vec<SegmentSummary> = catalog.segments.iter().map(|s| summarize(path, s)).collect();
    let first_index = catalog
        .segments
        .first()
        .map_or(0, |s| s.min_index);
    let last_sealed_index = catalog
        .segments
        .iter()
        .filter(|s| s.is_sealed())
        .map(|s| s.max_index)
        .max()
        .unwrap_or(0);
    let total_size = segments.iter().filter_map(|s| s.file_size).sum();

    Ok(InspectResult {
        path: path.display().to_string(),
        next_segment_id: catalog.next_segment_id,
        first_index,
        last_sealed_index,
        total_size,
        segments,
        orphans,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("segwal WAL Inspection");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!("Next segment ID: {}", result.next_segment_id);
    println!("First index: {}", result.first_index);
    println!("Last sealed index: {}", result.last_sealed_index);
    println!("Total size: {}", format_size(result.total_size));
    println!();
    println!("Segments ({}):", result.segments.len());
    for s in &result.segments {
        let range = if s.sealed {
            format!("{}..={}", s.min_index, s.max_index)
        } else {
            format!("{}.. (tail)", s.min_index)
        };
        let size = s
            .file_size
            .map_or_else(|| "missing".to_string(), format_size);
        println!(
            "  [{:>6}] base={:<10} {:<24} codec={} size={}",
            s.id, s.base_index, range, s.codec, size
        );
    }

    if !result.orphans.is_empty() {
        println!();
        println!("Orphaned files (deleted on next open):");
        for name in &result.orphans {
            println!("  {}", name);
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segwal_core::{LogEntry, Options, Wal};
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_catalog() {
        let dir = tempdir().unwrap();
        {
            let wal = Wal::open(dir.path(), Options::new().segment_size(2048)).unwrap();
            for i in 1..=40 {
                wal.store_log(&LogEntry::new(i, 1, vec![7; 100])).unwrap();
            }
            wal.close().unwrap();
        }

        let result = inspect(dir.path()).unwrap();
        assert!(result.segments.len() > 1);
        assert_eq!(result.first_index, 1);
        assert!(result.segments.last().is_some_and(|s| !s.sealed));
        assert!(result.segments.iter().all(|s| s.file_size.is_some()));
        assert!(result.orphans.is_empty());
        assert!(serde_json::to_string(&result).is_ok());
    }

    #[test]
    fn inspect_missing_dir_fails() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(10), "10 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
