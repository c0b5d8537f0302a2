//! Retrieval strategies that feed fusion.
//!
//! Every strategy turns a query into a [`RankedList`]; the orchestrator does
//! not care how. Keyword and vector retrieval are provided here; a reranker
//! or a second vector store is just another [`Retriever`].

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::error::{PilumError, Result};
use crate::lexical::SparseIndex;
use crate::ranking::{RankedHit, RankedList, RetrievalSource};
use crate::vector::{Embedder, VectorSearch};

/// Input to a retrieval strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    /// Query text as the caller wrote it, trimmed. Casing is kept for
    /// embedding models; the keyword path lowercases while tokenizing.
    pub text: String,
    /// Number of candidates wanted.
    pub top_k: usize,
}

impl RetrievalRequest {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        RetrievalRequest {
            text: text.into(),
            top_k,
        }
    }
}

/// A strategy producing one ranked list per query.
#[async_trait]
pub trait Retriever: Send + Sync + std::fmt::Debug {
    fn source(&self) -> RetrievalSource;

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RankedList>;
}

/// BM25 retrieval over the sparse index.
#[derive(Debug, Clone)]
pub struct KeywordRetriever {
    index: Arc<SparseIndex>,
}

impl KeywordRetriever {
    pub fn new(index: Arc<SparseIndex>) -> Self {
        KeywordRetriever { index }
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    fn source(&self) -> RetrievalSource {
        RetrievalSource::Keyword
    }

    /// Scoring is CPU-bound, so it runs on the blocking pool and does not
    /// hold up a concurrently polled vector call.
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RankedList> {
        let index = Arc::clone(&self.index);
        let text = request.text.clone();
        let top_k = request.top_k;
        let list = tokio::task::spawn_blocking(move || index.search_ranked(&text, top_k)).await?;
        Ok(list)
    }
}

/// Embeds the query and asks a vector search service for neighbours.
#[derive(Debug, Clone)]
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn VectorSearch>,
}

impl VectorRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, search: Arc<dyn VectorSearch>) -> Self {
        VectorRetriever { embedder, search }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn source(&self) -> RetrievalSource {
        RetrievalSource::Vector
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RankedList> {
        let embedding = self.embedder.embed(&request.text).await?;
        if let Some(expected) = self.search.dimension() {
            if embedding.len() != expected {
                return Err(PilumError::invalid_vector(format!(
                    "embedder produced {} dimensions, {} expects {expected}",
                    embedding.len(),
                    self.search.name()
                )));
            }
        }

        let matches = self.search.search(&embedding, request.top_k).await?;
        debug!(
            "{} returned {} matches for {:?}",
            self.search.name(),
            matches.len(),
            request.text
        );

        let hits = matches
            .into_iter()
            .map(|m| RankedHit::new(m.chunk_id, f64::from(m.score)))
            .collect();
        Ok(RankedList::new(RetrievalSource::Vector, hits))
    }
}
