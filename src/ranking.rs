//! Ranked results shared by every retrieval path.
//!
//! Scores carried here are only meaningful within their own list: a BM25
//! score and a cosine similarity are never compared. Fusion reads ranks.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkId;

/// The retrieval strategy a ranked list came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Keyword,
    Vector,
    /// Any additional strategy (a reranker, a second vector store, ...).
    Named(String),
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalSource::Keyword => f.write_str("keyword"),
            RetrievalSource::Vector => f.write_str("vector"),
            RetrievalSource::Named(name) => f.write_str(name),
        }
    }
}

/// One entry of a ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub chunk_id: ChunkId,
    pub score: f64,
}

impl RankedHit {
    pub fn new(chunk_id: impl Into<ChunkId>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

/// Descending score, then ascending chunk id.
pub fn compare_hits(a: &RankedHit, b: &RankedHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// An ordered list of hits from a single retrieval path.
///
/// Lists carry ids only. Chunks are resolved against the sparse index when
/// an answer is assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedList {
    pub source: RetrievalSource,
    pub hits: Vec<RankedHit>,
}

impl RankedList {
    pub fn new(source: RetrievalSource, hits: Vec<RankedHit>) -> Self {
        Self { source, hits }
    }

    pub fn empty(source: RetrievalSource) -> Self {
        Self::new(source, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// 1-based rank of a chunk, if present.
    pub fn rank_of(&self, chunk_id: &ChunkId) -> Option<usize> {
        self.hits
            .iter()
            .position(|hit| &hit.chunk_id == chunk_id)
            .map(|position| position + 1)
    }
}
