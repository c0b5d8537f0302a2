//! # Pilum
//!
//! Hybrid keyword and vector retrieval for grounding generated answers.
//!
//! ## Features
//!
//! - BM25 sparse index with copy-on-write updates and lock-free reads
//! - Pluggable vector search and embedding collaborators
//! - Reciprocal rank fusion over any number of ranked lists
//! - Sharded TTL result cache
//! - Graceful degradation to keyword-only answers, recorded in provenance
//! - Checksummed snapshots with background persistence

pub mod analysis;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod error;
pub mod hybrid;
pub mod lexical;
pub mod ranking;
pub mod storage;
pub mod vector;

pub mod prelude {
    pub use crate::chunk::{Chunk, ChunkId, DocumentId, SourceMetadata, SourceType};
    pub use crate::config::PilumConfig;
    pub use crate::error::{PilumError, Result};
    pub use crate::hybrid::{HybridRetriever, QueryResponse, RetrievalMode};
    pub use crate::lexical::SparseIndex;
    pub use crate::vector::{Embedder, VectorSearch};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
