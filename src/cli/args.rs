//! Command line argument parsing for the Pilum CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::vector::embedder::DEFAULT_HASH_DIMENSION;

/// Default snapshot file when neither `--snapshot` nor the config sets one.
pub const DEFAULT_SNAPSHOT_PATH: &str = "pilum.snapshot";

/// Pilum - hybrid keyword and vector retrieval
#[derive(Parser, Debug, Clone)]
#[command(name = "pilum")]
#[command(about = "Hybrid keyword and vector retrieval with reciprocal rank fusion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct PilumArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE", env = "PILUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Snapshot file of the sparse index; overrides the config
    #[arg(short, long, value_name = "SNAPSHOT", env = "PILUM_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl PilumArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add chunks from a JSON-lines file and save the snapshot
    Ingest(IngestArgs),

    /// Remove every chunk of a document and save the snapshot
    Remove(RemoveArgs),

    /// Run a hybrid query against the snapshot
    Search(SearchArgs),

    /// Show index statistics
    Stats(StatsArgs),
}

/// Arguments for ingesting chunks
#[derive(Parser, Debug, Clone)]
pub struct IngestArgs {
    /// Chunk file, one JSON object per line
    #[arg(value_name = "CHUNK_FILE")]
    pub chunk_file: PathBuf,

    /// Chunks inserted per batch
    #[arg(short, long, default_value = "1000")]
    pub batch_size: usize,

    /// Skip lines that fail to parse instead of aborting
    #[arg(long)]
    pub skip_invalid: bool,
}

/// Arguments for removing a document
#[derive(Parser, Debug, Clone)]
pub struct RemoveArgs {
    /// Document whose chunks are removed
    #[arg(value_name = "DOCUMENT_ID")]
    pub document_id: String,
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    /// Query string
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Maximum number of passages to return (default: fusion.top_n)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Keyword retrieval only
    #[arg(long)]
    pub keyword_only: bool,

    /// Dimension of the hash embedding used for vector retrieval
    #[arg(long, default_value_t = DEFAULT_HASH_DIMENSION)]
    pub dimension: usize,

    /// Print each passage's per-list ranks
    #[arg(long)]
    pub explain: bool,
}

/// Arguments for showing statistics
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// List the chunk ids of this document
    #[arg(long, value_name = "DOCUMENT_ID")]
    pub document: Option<String>,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
