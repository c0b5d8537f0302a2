//! Command implementations for the Pilum CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::chunk::{Chunk, DocumentId};
use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::PilumConfig;
use crate::error::{PilumError, Result};
use crate::hybrid::HybridRetriever;
use crate::lexical::LoadStatus;
use crate::vector::{HashEmbedder, InMemoryVectorIndex};

/// Execute a CLI command.
pub async fn execute_command(args: PilumArgs) -> Result<()> {
    let config = load_config(&args)?;
    match &args.command {
        Command::Ingest(ingest_args) => ingest_chunks(ingest_args, &config, &args).await,
        Command::Remove(remove_args) => remove_document(remove_args, &config, &args).await,
        Command::Search(search_args) => search(search_args, &config, &args).await,
        Command::Stats(stats_args) => show_stats(stats_args, &config, &args),
    }
}

/// Read the config file, if any, and settle the snapshot location.
pub fn load_config(args: &PilumArgs) -> Result<PilumConfig> {
    let mut config = match &args.config {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            PilumConfig::from_file(path)?
        }
        None => PilumConfig::default(),
    };

    if let Some(snapshot) = &args.snapshot {
        config.persistence.snapshot_path = Some(snapshot.clone());
    } else if config.persistence.snapshot_path.is_none() {
        config.persistence.snapshot_path = Some(PathBuf::from(DEFAULT_SNAPSHOT_PATH));
    }
    config.validate()?;
    Ok(config)
}

fn snapshot_display(config: &PilumConfig) -> String {
    config
        .persistence
        .snapshot_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_default()
}

/// Insert chunks from a JSON-lines file, then save the snapshot.
async fn ingest_chunks(args: &IngestArgs, config: &PilumConfig, cli_args: &PilumArgs) -> Result<()> {
    if args.batch_size == 0 {
        return Err(PilumError::invalid_config("--batch-size must be greater than 0"));
    }
    let (retriever, _) = HybridRetriever::open(config)?;
    let start_time = Instant::now();

    let reader = BufReader::new(File::open(&args.chunk_file)?);
    let mut lines_read = 0;
    let mut invalid_lines = 0;
    let mut chunks_inserted = 0;
    let mut duplicates_skipped = 0;
    let mut batch = Vec::with_capacity(args.batch_size);

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        lines_read += 1;

        match serde_json::from_str::<Chunk>(&line) {
            Ok(chunk) => batch.push(chunk),
            Err(e) if args.skip_invalid => {
                invalid_lines += 1;
                warn!("Skipping line {}: {e}", line_num + 1);
            }
            Err(e) => {
                let context = format!("{} line {}", args.chunk_file.display(), line_num + 1);
                return Err(anyhow::Error::new(e).context(context).into());
            }
        }

        if batch.len() == args.batch_size {
            let submitted = batch.len();
            let inserted = retriever.ingest(std::mem::take(&mut batch)).await?;
            chunks_inserted += inserted;
            duplicates_skipped += submitted - inserted;
            info!("Processed {lines_read} lines...");
        }
    }
    if !batch.is_empty() {
        let submitted = batch.len();
        let inserted = retriever.ingest(batch).await?;
        chunks_inserted += inserted;
        duplicates_skipped += submitted - inserted;
    }

    let generation = retriever.snapshot_now().await?;

    output_result(
        "Chunks ingested",
        &IngestReport {
            lines_read,
            chunks_inserted,
            duplicates_skipped,
            invalid_lines,
            generation,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

/// Remove a document, then save the snapshot if anything changed.
async fn remove_document(
    args: &RemoveArgs,
    config: &PilumConfig,
    cli_args: &PilumArgs,
) -> Result<()> {
    let (retriever, _) = HybridRetriever::open(config)?;
    let removed = retriever
        .remove_document(DocumentId::new(args.document_id.as_str()))
        .await?;
    if removed {
        retriever.snapshot_now().await?;
    }

    output_result(
        "Document removal",
        &RemovalReport {
            document_id: args.document_id.clone(),
            removed,
            chunks_remaining: retriever.index().len(),
        },
        cli_args,
    )
}

/// Query the snapshot. Unless `--keyword-only` is given, every chunk is
/// hash-embedded into an in-memory vector index so both paths take part.
async fn search(args: &SearchArgs, config: &PilumConfig, cli_args: &PilumArgs) -> Result<()> {
    let (retriever, status) = HybridRetriever::open(config)?;
    if let LoadStatus::Degraded(reason) = &status {
        warn!("Searching an empty index: {reason}");
    }

    let retriever = if args.keyword_only {
        retriever
    } else {
        let embedder = Arc::new(HashEmbedder::new(args.dimension));
        let vectors = Arc::new(InMemoryVectorIndex::new(args.dimension));
        let snapshot = retriever.index().snapshot();
        let chunks: Vec<_> = snapshot.chunks().cloned().collect();

        let embedded: Vec<_> = chunks
            .par_iter()
            .filter_map(|chunk| match embedder.embed_sync(&chunk.text) {
                Ok(vector) => Some((Arc::clone(chunk), vector)),
                Err(e) => {
                    debug!("Not embedding chunk {}: {e}", chunk.chunk_id);
                    None
                }
            })
            .collect();
        for (chunk, vector) in embedded {
            vectors.upsert(&chunk, vector)?;
        }
        debug!("Embedded {} chunks for vector retrieval", vectors.len());

        retriever.with_vector_search(embedder, vectors)
    };

    let start_time = Instant::now();
    let response = match args.top_k {
        Some(top_k) => retriever.query(&args.query, top_k).await?,
        None => retriever.query_default(&args.query).await?,
    };

    output_result(
        "Search completed",
        &SearchReport {
            response,
            duration_ms: start_time.elapsed().as_millis() as u64,
            explain: args.explain,
        },
        cli_args,
    )
}

fn show_stats(args: &StatsArgs, config: &PilumConfig, cli_args: &PilumArgs) -> Result<()> {
    let (retriever, status) = HybridRetriever::open(config)?;
    let document_chunks = args.document.as_ref().map(|document_id| {
        retriever
            .index()
            .chunk_ids_for(&DocumentId::new(document_id.as_str()))
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    });

    output_result(
        "Index statistics",
        &StatsReport {
            snapshot: snapshot_display(config),
            load_status: describe_load_status(&status),
            engine: retriever.stats(),
            document_chunks,
        },
        cli_args,
    )
}
