//! Contract for external vector search services.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::chunk::ChunkId;
use crate::error::Result;

/// One result from a vector search, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: ChunkId,
    /// Similarity as reported by the service. Only its order matters.
    pub score: f32,
}

impl VectorMatch {
    pub fn new(chunk_id: impl Into<ChunkId>, score: f32) -> Self {
        VectorMatch {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

/// A nearest-neighbour service queried with an externally produced
/// embedding.
///
/// Implementations return matches in the service's own order and do no
/// ranking of their own. Only chunk ids come back; a match for a chunk the
/// sparse index no longer holds is dropped when the answer is assembled. Failures are reported as
/// [`PilumError::AdapterTimeout`](crate::error::PilumError::AdapterTimeout),
/// [`PilumError::AdapterUnavailable`](crate::error::PilumError::AdapterUnavailable)
/// or [`PilumError::InvalidVector`](crate::error::PilumError::InvalidVector);
/// callers treat all three as degradations rather than query failures.
#[async_trait]
pub trait VectorSearch: Send + Sync + Debug {
    /// Return up to `top_k` matches for `query`.
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;

    /// Fixed dimensionality of stored vectors, if known.
    fn dimension(&self) -> Option<usize> {
        None
    }

    /// Name used in logs.
    fn name(&self) -> &str {
        "vector"
    }
}
