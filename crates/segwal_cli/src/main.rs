//! segwal CLI
//!
//! Command-line tools for inspecting segwal write-ahead logs.
//!
//! # Commands
//!
//! - `inspect` - Display the segment catalog
//! - `verify` - Check every segment and entry
//! - `dump` - Print log entries for debugging
//!
//! All commands are read-only and do not take the directory lock.

mod commands;

use clap::{Parser, Subcommand};
use segwal_core::WalError;
use segwal_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors reported by the CLI itself.
#[derive(Debug, Error)]
pub enum CliError {
    /// No WAL directory at the given path.
    #[error("no WAL directory at {0:?}")]
    NoWal(PathBuf),

    /// A command needs `--path`.
    #[error("WAL path required for {0}")]
    MissingPath(&'static str),

    /// Verification found problems.
    #[error("verification failed with {0} error(s)")]
    VerificationFailed(usize),

    /// A segment file could not be opened.
    #[error("cannot open {path:?}: {source}")]
    Open {
        /// Segment file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: StorageError,
    },

    /// A segment file ends before its header does.
    #[error("file is {size} bytes, shorter than the header")]
    ShortSegment {
        /// File size in bytes.
        size: u64,
    },

    /// The header belongs to a different segment than the catalog says.
    #[error("header names segment {found_id} base {found_base}, catalog says segment {id} base {base}")]
    HeaderMismatch {
        /// Segment ID in the header.
        found_id: u64,
        /// Base index in the header.
        found_base: u64,
        /// Segment ID in the catalog.
        id: u64,
        /// Base index in the catalog.
        base: u64,
    },

    /// A sealed segment's index block offset lies outside the file.
    #[error("index block offset {offset} outside file of {size} bytes")]
    IndexOutOfRange {
        /// Recorded index block offset.
        offset: u64,
        /// File size in bytes.
        size: u64,
    },

    /// A frame extends past the area it must fit in.
    #[error("frame at offset {offset} runs past byte {limit}")]
    FrameOutOfBounds {
        /// Frame offset.
        offset: u64,
        /// First byte the frame may not reach.
        limit: u64,
    },

    /// An index points at a frame holding another index.
    #[error("frame holds index {found}, expected {expected}")]
    FrameIndexMismatch {
        /// Index the catalog points at.
        expected: u64,
        /// Index stored in the frame.
        found: u64,
    },

    /// Segment format or checksum error.
    #[error(transparent)]
    Wal(#[from] WalError),

    /// Storage error while reading a segment.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// segwal command-line WAL tools.
#[derive(Parser)]
#[command(name = "segwal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the WAL directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the segment catalog
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every segment and entry
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump log entries for debugging
    Dump {
        /// First index to print
        #[arg(long, default_value = "0")]
        from: u64,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("inspect"))?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("verify"))?;
            commands::verify::run(&path, &format)?;
        }
        Commands::Dump {
            from,
            limit,
            format,
        } => {
            let path = cli.path.ok_or(CliError::MissingPath("dump"))?;
            commands::dump::run(&path, from, limit, &format)?;
        }
        Commands::Version => {
            println!("segwal CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
