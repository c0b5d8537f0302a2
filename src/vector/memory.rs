//! Exact cosine search over vectors held in memory.

use ahash::AHashMap;
use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::chunk::{Chunk, ChunkId, DocumentId};
use crate::error::Result;
use crate::vector::adapter::{VectorMatch, VectorSearch};
use crate::vector::similarity::{dot, normalize, validate};

#[derive(Debug, Clone)]
struct StoredVector {
    document_id: DocumentId,
    /// Unit length, so a dot product is the cosine similarity.
    unit: Vec<f32>,
}

/// A brute-force [`VectorSearch`] implementation.
///
/// Suitable for tests, small corpora and the command line tool. Results are
/// ordered by descending cosine similarity with ties broken by chunk id.
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: usize,
    vectors: RwLock<AHashMap<ChunkId, StoredVector>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        InMemoryVectorIndex {
            dimension,
            vectors: RwLock::new(AHashMap::new()),
        }
    }

    /// Store (or replace) the vector for a chunk.
    pub fn upsert(&self, chunk: &Chunk, vector: Vec<f32>) -> Result<()> {
        self.upsert_vector(chunk.chunk_id.clone(), chunk.document_id.clone(), vector)
    }

    pub fn upsert_vector(
        &self,
        chunk_id: impl Into<ChunkId>,
        document_id: impl Into<DocumentId>,
        mut vector: Vec<f32>,
    ) -> Result<()> {
        validate(&vector, self.dimension)?;
        normalize(&mut vector);
        self.vectors.write().insert(
            chunk_id.into(),
            StoredVector {
                document_id: document_id.into(),
                unit: vector,
            },
        );
        Ok(())
    }

    /// Drop every vector of a document. Returns how many were removed.
    pub fn remove_document(&self, document_id: &DocumentId) -> usize {
        let mut vectors = self.vectors.write();
        let before = vectors.len();
        vectors.retain(|_, stored| &stored.document_id != document_id);
        let removed = before - vectors.len();
        if removed > 0 {
            debug!("Removed {removed} vectors of document {document_id}");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }

    /// Synchronous search used by the async trait implementation.
    pub fn search_exact(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        validate(query, self.dimension)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut unit = query.to_vec();
        normalize(&mut unit);

        let vectors = self.vectors.read();
        let mut scored: Vec<(&ChunkId, f32)> = vectors
            .par_iter()
            .map(|(chunk_id, stored)| (chunk_id, dot(&unit, &stored.unit)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(chunk_id, score)| VectorMatch::new(chunk_id.clone(), score))
            .collect())
    }
}

#[async_trait]
impl VectorSearch for InMemoryVectorIndex {
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        self.search_exact(query, top_k)
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new(crate::vector::embedder::DEFAULT_HASH_DIMENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PilumError;

    fn index() -> InMemoryVectorIndex {
        let index = InMemoryVectorIndex::new(2);
        index.upsert_vector("a", "d1", vec![1.0, 0.0]).unwrap();
        index.upsert_vector("b", "d2", vec![0.6, 0.8]).unwrap();
        index.upsert_vector("c", "d2", vec![0.0, 1.0]).unwrap();
        index
    }

    fn ids(matches: &[VectorMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.chunk_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = index();
        let matches = index.search(&[0.0, 2.0], 3).await.unwrap();
        assert_eq!(ids(&matches), vec!["c", "b", "a"]);
        assert!((matches[0].score - 1.0).abs() < 1e-6);

        let matches = index.search(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(ids(&matches), vec!["a"]);
    }

    #[test]
    fn test_ties_break_by_chunk_id() {
        let index = InMemoryVectorIndex::new(2);
        index.upsert_vector("z", "d", vec![1.0, 1.0]).unwrap();
        index.upsert_vector("m", "d", vec![1.0, 1.0]).unwrap();
        let matches = index.search_exact(&[1.0, 1.0], 2).unwrap();
        assert_eq!(ids(&matches), vec!["m", "z"]);
    }

    #[test]
    fn test_invalid_vectors_rejected() {
        let index = index();
        assert!(matches!(
            index.search_exact(&[1.0, 0.0, 0.0], 3),
            Err(PilumError::InvalidVector(_))
        ));
        assert!(index.upsert_vector("x", "d", vec![0.0, 0.0]).is_err());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_upsert_chunk_and_remove_document() {
        let index = index();
        index
            .upsert(&Chunk::new("p", "d3", "payload"), vec![1.0, 1.0])
            .unwrap();

        let matches = index.search_exact(&[1.0, 1.0], 1).unwrap();
        assert_eq!(ids(&matches), vec!["p"]);

        assert_eq!(index.remove_document(&DocumentId::from("d2")), 2);
        assert_eq!(index.remove_document(&DocumentId::from("d2")), 0);
        assert_eq!(index.len(), 2);
    }
}
