//! Query answers and their provenance.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkId, DocumentId, SourceMetadata};
use crate::error::PilumError;
use crate::hybrid::fusion::{ContributingRank, FusedHit};
use crate::ranking::RetrievalSource;

/// Which retrieval paths produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Keyword and at least one semantic list were fused.
    Hybrid,
    /// Only the keyword list was available.
    KeywordOnly,
}

/// Why a retrieval path was left out of fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationReason {
    Timeout,
    Unavailable,
    InvalidVector,
    EmbeddingFailed,
    Failed,
}

impl DegradationReason {
    pub fn from_error(err: &PilumError) -> Self {
        match err {
            PilumError::AdapterTimeout(_) => DegradationReason::Timeout,
            PilumError::AdapterUnavailable(_) => DegradationReason::Unavailable,
            PilumError::InvalidVector(_) => DegradationReason::InvalidVector,
            PilumError::Embedding(_) => DegradationReason::EmbeddingFailed,
            _ => DegradationReason::Failed,
        }
    }
}

/// A retrieval path that did not contribute to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub source: RetrievalSource,
    pub reason: DegradationReason,
    pub detail: String,
}

/// How an answer was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub mode: RetrievalMode,
    pub cache_hit: bool,
    pub degradations: Vec<Degradation>,
    /// Size of each ranked list that went into fusion.
    pub candidates: Vec<(RetrievalSource, usize)>,
}

impl Provenance {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    pub fn is_hybrid(&self) -> bool {
        self.mode == RetrievalMode::Hybrid
    }
}

/// One passage of an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub source_metadata: SourceMetadata,
    pub fused_score: f64,
    pub contributing_ranks: Vec<ContributingRank>,
}

impl RetrievedPassage {
    pub fn new(hit: FusedHit, chunk: &Chunk) -> Self {
        RetrievedPassage {
            chunk_id: hit.chunk_id,
            document_id: chunk.document_id.clone(),
            text: chunk.text.clone(),
            source_metadata: chunk.source_metadata.clone(),
            fused_score: hit.fused_score,
            contributing_ranks: hit.contributing_ranks,
        }
    }
}

/// The answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Normalized query text, also the cache key.
    pub query: String,
    pub passages: Vec<RetrievedPassage>,
    pub provenance: Provenance,
}

impl QueryResponse {
    pub fn chunk_ids(&self) -> Vec<&str> {
        self.passages.iter().map(|p| p.chunk_id.as_str()).collect()
    }
}

/// What the result cache stores for a normalized query.
#[derive(Debug, Clone)]
pub struct CachedAnswer {
    /// `top_k` the answer was computed for; it can serve any smaller request.
    pub top_k: usize,
    pub passages: Arc<Vec<RetrievedPassage>>,
    pub provenance: Provenance,
}

impl CachedAnswer {
    pub fn serves(&self, top_k: usize) -> bool {
        top_k <= self.top_k
    }

    pub fn to_response(&self, query: String, top_k: usize) -> QueryResponse {
        let mut provenance = self.provenance.clone();
        provenance.cache_hit = true;
        QueryResponse {
            query,
            passages: self.passages.iter().take(top_k).cloned().collect(),
            provenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradation_reason_mapping() {
        assert_eq!(
            DegradationReason::from_error(&PilumError::adapter_timeout("t")),
            DegradationReason::Timeout
        );
        assert_eq!(
            DegradationReason::from_error(&PilumError::embedding("e")),
            DegradationReason::EmbeddingFailed
        );
        assert_eq!(
            DegradationReason::from_error(&PilumError::other("o")),
            DegradationReason::Failed
        );
    }

    #[test]
    fn test_cached_answer_truncates_and_flags_hit() {
        let chunk = Chunk::new("a", "d", "text");
        let passages: Vec<_> = (0..3)
            .map(|i| {
                RetrievedPassage::new(
                    FusedHit {
                        chunk_id: ChunkId::from(format!("c{i}")),
                        fused_score: 1.0 / (61.0 + i as f64),
                        contributing_ranks: Vec::new(),
                    },
                    &chunk,
                )
            })
            .collect();
        let cached = CachedAnswer {
            top_k: 3,
            passages: Arc::new(passages),
            provenance: Provenance {
                mode: RetrievalMode::Hybrid,
                cache_hit: false,
                degradations: Vec::new(),
                candidates: Vec::new(),
            },
        };

        assert!(cached.serves(2));
        assert!(!cached.serves(4));
        let response = cached.to_response("q".into(), 2);
        assert_eq!(response.chunk_ids(), vec!["c0", "c1"]);
        assert!(response.provenance.cache_hit);
        assert!(!cached.provenance.cache_hit);
    }
}
