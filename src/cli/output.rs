//! Output formatting for CLI commands.

use serde::Serialize;

use crate::cli::args::{OutputFormat, PilumArgs};
use crate::error::Result;
use crate::hybrid::{EngineStats, QueryResponse};
use crate::lexical::LoadStatus;

/// Result of an `ingest` run.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub lines_read: usize,
    pub chunks_inserted: usize,
    pub duplicates_skipped: usize,
    pub invalid_lines: usize,
    pub generation: u64,
    pub duration_ms: u64,
}

/// Result of a `remove` run.
#[derive(Debug, Serialize)]
pub struct RemovalReport {
    pub document_id: String,
    pub removed: bool,
    pub chunks_remaining: usize,
}

/// Result of a `search` run.
#[derive(Debug, Serialize)]
pub struct SearchReport {
    #[serde(flatten)]
    pub response: QueryResponse,
    pub duration_ms: u64,
    #[serde(skip)]
    pub explain: bool,
}

/// Result of a `stats` run.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub snapshot: String,
    pub load_status: String,
    #[serde(flatten)]
    pub engine: EngineStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_chunks: Option<Vec<String>>,
}

/// Human-readable rendering of a report.
pub trait HumanOutput {
    fn print_human(&self);
}

/// Print a report in the requested format.
pub fn output_result<T: Serialize + HumanOutput>(
    message: &str,
    result: &T,
    args: &PilumArgs,
) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 1 {
                println!("{message}");
                println!();
            }
            result.print_human();
        }
        OutputFormat::Json => {
            let json = if args.pretty {
                serde_json::to_string_pretty(result)?
            } else {
                serde_json::to_string(result)?
            };
            println!("{json}");
        }
    }
    Ok(())
}

pub fn describe_load_status(status: &LoadStatus) -> String {
    match status {
        LoadStatus::Loaded { chunks, generation } => {
            format!("loaded ({chunks} chunks, generation {generation})")
        }
        LoadStatus::Missing => "missing (started empty)".to_string(),
        LoadStatus::Degraded(reason) => format!("unusable, started empty: {reason}"),
    }
}

impl HumanOutput for IngestReport {
    fn print_human(&self) {
        println!("Ingest:");
        println!("═══════");
        println!("Lines read: {}", self.lines_read);
        println!("Chunks inserted: {}", self.chunks_inserted);
        if self.duplicates_skipped > 0 {
            println!("Duplicates skipped: {}", self.duplicates_skipped);
        }
        if self.invalid_lines > 0 {
            println!("Invalid lines skipped: {}", self.invalid_lines);
        }
        println!("Index generation: {}", self.generation);
        println!("Time: {}ms", self.duration_ms);
    }
}

impl HumanOutput for RemovalReport {
    fn print_human(&self) {
        if self.removed {
            println!("Removed document {}", self.document_id);
        } else {
            println!("Document {} was not indexed", self.document_id);
        }
        println!("Chunks remaining: {}", self.chunks_remaining);
    }
}

impl HumanOutput for SearchReport {
    fn print_human(&self) {
        let provenance = &self.response.provenance;
        println!("Search Results:");
        println!("═══════════════");

        for (i, passage) in self.response.passages.iter().enumerate() {
            println!();
            println!(
                "Result {}: {} (document {}, score {:.4})",
                i + 1,
                passage.chunk_id,
                passage.document_id,
                passage.fused_score
            );
            println!("─────────────");
            println!("{}", truncate(&passage.text, 240));
            if self.explain {
                for rank in &passage.contributing_ranks {
                    println!(
                        "  {} rank {} contributes {:.4}",
                        rank.source, rank.rank, rank.contribution
                    );
                }
            }
        }

        println!();
        if self.response.passages.is_empty() {
            println!("No matching passages");
        }
        println!(
            "Mode: {}{}",
            if provenance.is_hybrid() {
                "hybrid"
            } else {
                "keyword only"
            },
            if provenance.cache_hit { " (cached)" } else { "" }
        );
        for degradation in &provenance.degradations {
            println!(
                "Degraded: {} skipped ({:?}): {}",
                degradation.source, degradation.reason, degradation.detail
            );
        }
        println!("Search time: {}ms", self.duration_ms);
    }
}

impl HumanOutput for StatsReport {
    fn print_human(&self) {
        let index = &self.engine.index;
        println!("Index Statistics:");
        println!("════════════════");
        println!("Snapshot: {} ({})", self.snapshot, self.load_status);
        if let Some(bytes) = self.engine.snapshot_bytes {
            println!("Snapshot size: {bytes} bytes");
        }
        println!("Chunks: {}", index.chunk_count);
        println!("Documents: {}", index.document_count);
        println!("Terms: {}", index.term_count);
        println!("Average chunk length: {:.1}", index.average_chunk_length);
        println!(
            "Generation: {} (persisted {}{})",
            index.generation,
            index.persisted_generation,
            if index.dirty { ", unsaved changes" } else { "" }
        );

        if let Some(chunks) = &self.document_chunks {
            println!();
            println!("Document chunks:");
            println!("────────────────");
            if chunks.is_empty() {
                println!("  (not indexed)");
            }
            for chunk_id in chunks {
                println!("  {chunk_id}");
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
