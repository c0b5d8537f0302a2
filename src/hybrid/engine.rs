//! Hybrid retrieval orchestrator.
//!
//! [`HybridRetriever`] answers a query by checking the result cache, running
//! keyword retrieval and every semantic retriever concurrently, fusing their
//! rankings with reciprocal rank fusion and caching the answer. Semantic
//! retrievers that fail or miss the per-query deadline are dropped from
//! fusion and recorded in the answer's provenance; keyword retrieval always
//! contributes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::analysis::normalize_query;
use crate::chunk::{Chunk, DocumentId};
use crate::config::PilumConfig;
use crate::error::{PilumError, Result};
use crate::hybrid::cache::{CacheStats, ResultCache};
use crate::hybrid::fusion::{FusionConfig, reciprocal_rank_fusion};
use crate::hybrid::maintenance::{
    self, MaintenanceContext, MaintenanceHandle, MaintenanceSettings, MaintenanceStats,
    PersistTarget,
};
use crate::hybrid::retriever::{KeywordRetriever, RetrievalRequest, Retriever, VectorRetriever};
use crate::hybrid::types::{
    CachedAnswer, Degradation, DegradationReason, Provenance, QueryResponse, RetrievalMode,
    RetrievedPassage,
};
use crate::lexical::{IndexStats, LoadStatus, SparseIndex};
use crate::ranking::RankedList;
use crate::storage::{FileStorage, Storage};
use crate::vector::{Embedder, VectorSearch};

/// Counters describing query traffic.
#[derive(Debug, Default)]
struct QueryCounters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    degraded_queries: AtomicU64,
    timeouts: AtomicU64,
    invalid_queries: AtomicU64,
}

/// Point-in-time statistics of a [`HybridRetriever`].
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub queries: u64,
    pub cache_hits: u64,
    /// Answers fused without at least one semantic list.
    pub degraded_queries: u64,
    /// Semantic retrievals cut off by the query deadline.
    pub timeouts: u64,
    pub invalid_queries: u64,
    pub cache: CacheStats,
    pub index: IndexStats,
    /// Bytes of the snapshot on disk, when persistence is set and one exists.
    pub snapshot_bytes: Option<u64>,
    /// Present while a maintenance task is running.
    pub maintenance: Option<MaintenanceStats>,
}

/// Hybrid keyword and semantic retrieval over a shared sparse index.
///
/// The retriever is `Send + Sync`; share it behind an `Arc` and call
/// [`HybridRetriever::query`] from as many tasks as needed. Queries never
/// wait on each other or on ingestion.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use pilum::chunk::Chunk;
/// use pilum::config::PilumConfig;
/// use pilum::hybrid::HybridRetriever;
/// use pilum::lexical::SparseIndex;
/// use pilum::vector::{HashEmbedder, InMemoryVectorIndex};
///
/// # tokio_test::block_on(async {
/// let config = PilumConfig::default();
/// let index = Arc::new(SparseIndex::new(config.bm25));
/// let embedder = Arc::new(HashEmbedder::new(64));
/// let vectors = Arc::new(InMemoryVectorIndex::new(64));
///
/// let retriever = HybridRetriever::new(index, &config)
///     .unwrap()
///     .with_vector_search(embedder, vectors);
///
/// retriever
///     .ingest(vec![Chunk::new("c1", "doc", "kubernetes networking")])
///     .await
///     .unwrap();
///
/// let response = retriever.query("Kubernetes", 5).await.unwrap();
/// assert_eq!(response.chunk_ids(), vec!["c1"]);
/// # });
/// ```
#[derive(Debug)]
pub struct HybridRetriever {
    index: Arc<SparseIndex>,
    keyword: KeywordRetriever,
    semantic: Vec<Arc<dyn Retriever>>,
    cache: Arc<ResultCache<CachedAnswer>>,
    config: PilumConfig,
    persistence: Option<PersistTarget>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
    counters: QueryCounters,
}

impl HybridRetriever {
    /// Create a retriever over `index` with keyword retrieval only.
    ///
    /// # Arguments
    ///
    /// * `index` - The sparse index, possibly shared with an ingestion path
    /// * `config` - Fusion, cache and retrieval settings; validated here
    pub fn new(index: Arc<SparseIndex>, config: &PilumConfig) -> Result<Self> {
        config.validate()?;
        Ok(HybridRetriever {
            keyword: KeywordRetriever::new(Arc::clone(&index)),
            index,
            semantic: Vec::new(),
            cache: Arc::new(ResultCache::new(&config.cache)),
            config: config.clone(),
            persistence: None,
            maintenance: Mutex::new(None),
            counters: QueryCounters::default(),
        })
    }

    /// Open a retriever as configured: when a snapshot path is set, the
    /// sparse index is loaded from it and snapshots are written back there.
    ///
    /// A missing or corrupt snapshot is not an error; the index starts empty
    /// and the returned [`LoadStatus`] says why.
    pub fn open(config: &PilumConfig) -> Result<(Self, LoadStatus)> {
        config.validate()?;
        match config.persistence.location() {
            Some((directory, name)) => {
                let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&directory)?);
                let (index, status) =
                    SparseIndex::open(storage.as_ref(), &name, config.bm25);
                let retriever =
                    Self::new(Arc::new(index), config)?.with_persistence(storage, name);
                Ok((retriever, status))
            }
            None => {
                let index = Arc::new(SparseIndex::new(config.bm25));
                Ok((Self::new(index, config)?, LoadStatus::Missing))
            }
        }
    }

    /// Add semantic retrieval through an embedder and a vector search service.
    pub fn with_vector_search(
        self,
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn VectorSearch>,
    ) -> Self {
        self.with_retriever(Arc::new(VectorRetriever::new(embedder, search)))
    }

    /// Add a semantic retriever. Its list is fused alongside the others and
    /// is subject to the query deadline. Each retriever should report a
    /// distinct [`RetrievalSource`](crate::ranking::RetrievalSource).
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.semantic.push(retriever);
        self
    }

    /// Persist the sparse index as `name` in `storage`.
    pub fn with_persistence(mut self, storage: Arc<dyn Storage>, name: impl Into<String>) -> Self {
        self.persistence = Some(PersistTarget::new(storage, name));
        self
    }

    /// Answer a query with up to `top_k` passages.
    ///
    /// The normalized text (lowercased, whitespace collapsed) is the cache
    /// key; retrievers get the trimmed text as written. Adapter failures and
    /// timeouts never fail the query; they show up in the returned
    /// provenance.
    ///
    /// Only chunks the sparse index still holds when the answer is assembled
    /// are returned, and an answer computed across a document removal is not
    /// cached.
    ///
    /// # Errors
    ///
    /// Returns [`PilumError::InvalidQuery`] when the normalized text is empty
    /// or `top_k` is zero.
    pub async fn query(&self, raw_query: &str, top_k: usize) -> Result<QueryResponse> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        let query = normalize_query(raw_query);
        if query.is_empty() {
            self.counters.invalid_queries.fetch_add(1, Ordering::Relaxed);
            return Err(PilumError::invalid_query("query text is empty"));
        }
        if top_k == 0 {
            self.counters.invalid_queries.fetch_add(1, Ordering::Relaxed);
            return Err(PilumError::invalid_query("top_k must be greater than 0"));
        }

        // Read before retrieval so a removal landing mid-query keeps this
        // answer out of the cache.
        let cache_epoch = self.cache.epoch();
        if let Some(cached) = self.cache.get(&query) {
            if cached.serves(top_k) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {query:?}");
                return Ok(cached.to_response(query, top_k));
            }
        }

        let depth = self.config.retrieval.candidate_depth.max(top_k);
        let request = RetrievalRequest::new(raw_query.trim(), depth);
        let deadline = self.config.retrieval.query_timeout();

        let semantic = join_all(
            self.semantic
                .iter()
                .map(|retriever| self.retrieve_with_deadline(retriever.as_ref(), &request, deadline)),
        );
        let (keyword, semantic) = tokio::join!(self.keyword.retrieve(&request), semantic);

        let mut lists = vec![keyword?];
        let mut degradations = Vec::new();
        for outcome in semantic {
            match outcome {
                Ok(list) => lists.push(list),
                Err(degradation) => degradations.push(degradation),
            }
        }

        let passages = self.fuse(&lists, top_k);
        let provenance = Provenance {
            mode: if lists.len() > 1 {
                RetrievalMode::Hybrid
            } else {
                RetrievalMode::KeywordOnly
            },
            cache_hit: false,
            candidates: lists.iter().map(|l| (l.source.clone(), l.len())).collect(),
            degradations,
        };

        if provenance.is_degraded() {
            self.counters
                .degraded_queries
                .fetch_add(1, Ordering::Relaxed);
        }
        if !provenance.is_degraded() || self.config.retrieval.cache_degraded_results {
            let answer = CachedAnswer {
                top_k,
                passages: Arc::new(passages.clone()),
                provenance: provenance.clone(),
            };
            if !self.cache.put_if_current(query.clone(), answer, cache_epoch) {
                debug!("Not caching {query:?}: the index changed while it was answered");
            }
        }

        Ok(QueryResponse {
            query,
            passages,
            provenance,
        })
    }

    /// [`HybridRetriever::query`] with the configured `fusion.top_n`.
    pub async fn query_default(&self, raw_query: &str) -> Result<QueryResponse> {
        self.query(raw_query, self.config.fusion.top_n).await
    }

    async fn retrieve_with_deadline(
        &self,
        retriever: &dyn Retriever,
        request: &RetrievalRequest,
        deadline: Duration,
    ) -> std::result::Result<RankedList, Degradation> {
        let source = retriever.source();
        match tokio::time::timeout(deadline, retriever.retrieve(request)).await {
            Ok(Ok(list)) => Ok(list),
            Ok(Err(err)) => {
                if err.is_degradable() {
                    warn!("{source} retrieval failed, continuing without it: {err}");
                } else {
                    error!("{source} retrieval failed unexpectedly, continuing without it: {err}");
                }
                Err(Degradation {
                    source,
                    reason: DegradationReason::from_error(&err),
                    detail: err.to_string(),
                })
            }
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("{source} retrieval exceeded {deadline:?}, continuing without it");
                Err(Degradation {
                    source,
                    reason: DegradationReason::Timeout,
                    detail: format!("no answer within {deadline:?}"),
                })
            }
        }
    }

    /// Fuse, then resolve every hit against one version of the sparse
    /// index. Hits whose chunk is gone (removed mid-query, or a vector store
    /// lagging behind a removal) are skipped.
    fn fuse(&self, lists: &[RankedList], top_k: usize) -> Vec<RetrievedPassage> {
        let fusion = FusionConfig {
            k: self.config.fusion.k,
            top_n: usize::MAX,
        };
        let snapshot = self.index.snapshot();

        let mut passages = Vec::with_capacity(top_k);
        for hit in reciprocal_rank_fusion(lists, &fusion) {
            if passages.len() == top_k {
                break;
            }
            match snapshot.chunk(&hit.chunk_id) {
                Some(chunk) => passages.push(RetrievedPassage::new(hit, chunk)),
                None => debug!("Skipping unresolvable chunk {}", hit.chunk_id),
            }
        }
        passages
    }

    /// Add chunks to the sparse index and return how many were new.
    ///
    /// Cached answers are kept; they age out with the cache TTL.
    pub async fn ingest(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let index = Arc::clone(&self.index);
        let inserted = tokio::task::spawn_blocking(move || index.insert(chunks)).await?;
        debug!("Ingested {inserted} chunks");
        Ok(inserted)
    }

    /// Remove every chunk of a document. Returns once the rebuilt index is
    /// in place; `false` means the document was not indexed. The result
    /// cache is cleared after a removal.
    pub async fn remove_document(&self, document_id: impl Into<DocumentId>) -> Result<bool> {
        let document_id = document_id.into();
        let client = self.maintenance.lock().as_ref().map(MaintenanceHandle::client);
        let removed = match client {
            Some(client) => client.rebuild(document_id.clone()).await?,
            None => maintenance::rebuild(&self.maintenance_context(), document_id.clone()).await?,
        };
        if removed {
            info!("Removed document {document_id}");
        }
        Ok(removed)
    }

    /// Snapshot the sparse index now.
    ///
    /// # Errors
    ///
    /// Returns [`PilumError::InvalidConfig`] when no persistence target is
    /// set, or the underlying storage error.
    pub async fn snapshot_now(&self) -> Result<u64> {
        let client = self.maintenance.lock().as_ref().map(MaintenanceHandle::client);
        if let Some(client) = client {
            return client.persist().await;
        }
        match &self.persistence {
            Some(target) => target.persist(&self.index).await,
            None => Err(PilumError::invalid_config(
                "no snapshot location configured",
            )),
        }
    }

    /// Start background maintenance with intervals taken from the config.
    pub fn spawn_maintenance(&self) {
        let sweep_secs = self.config.cache.sweep_interval_secs;
        self.spawn_maintenance_with(MaintenanceSettings {
            persist_interval: self.config.persistence.interval(),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        });
    }

    /// Start background maintenance. Must be called inside a tokio runtime.
    /// Does nothing if maintenance is already running.
    pub fn spawn_maintenance_with(&self, settings: MaintenanceSettings) {
        let mut slot = self.maintenance.lock();
        if slot.as_ref().is_some_and(MaintenanceHandle::is_running) {
            debug!("Maintenance already running");
            return;
        }
        *slot = Some(MaintenanceHandle::spawn(self.maintenance_context(), settings));
    }

    fn maintenance_context(&self) -> MaintenanceContext {
        MaintenanceContext {
            index: Arc::clone(&self.index),
            cache: Arc::clone(&self.cache),
            persistence: self.persistence.clone(),
        }
    }

    /// Stop background maintenance and flush unsaved changes.
    pub async fn shutdown(&self) -> Result<()> {
        let handle = self.maintenance.lock().take();
        match handle {
            Some(handle) => handle.shutdown().await,
            None => {
                if let Some(target) = &self.persistence {
                    if let Some(generation) = target.persist_if_dirty(&self.index).await? {
                        info!("Flushed sparse index generation {generation} on shutdown");
                    }
                }
                Ok(())
            }
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            queries: self.counters.queries.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            degraded_queries: self.counters.degraded_queries.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            invalid_queries: self.counters.invalid_queries.load(Ordering::Relaxed),
            cache: self.cache.stats(),
            index: self.index.stats(),
            snapshot_bytes: self.persistence.as_ref().and_then(PersistTarget::snapshot_size),
            maintenance: self.maintenance.lock().as_ref().map(MaintenanceHandle::stats),
        }
    }

    pub fn index(&self) -> &Arc<SparseIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Arc<ResultCache<CachedAnswer>> {
        &self.cache
    }

    pub fn config(&self) -> &PilumConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid::cache::CacheConfig;
    use crate::lexical::Bm25Params;
    use crate::ranking::RetrievalSource;
    use crate::storage::MemoryStorage;
    use crate::vector::{HashEmbedder, InMemoryVectorIndex};

    fn index() -> Arc<SparseIndex> {
        Arc::new(SparseIndex::from_chunks(
            vec![
                Chunk::new("a", "d1", "kubernetes networking"),
                Chunk::new("b", "d2", "docker networking"),
                Chunk::new("c", "d3", "sourdough bread baking"),
            ],
            Bm25Params::default(),
        ))
    }

    #[tokio::test]
    async fn test_keyword_only_is_not_degraded() {
        let retriever = HybridRetriever::new(index(), &PilumConfig::default()).unwrap();
        let response = retriever.query("  Kubernetes ", 5).await.unwrap();

        assert_eq!(response.query, "kubernetes");
        assert_eq!(response.chunk_ids(), vec!["a"]);
        assert_eq!(response.provenance.mode, RetrievalMode::KeywordOnly);
        assert!(!response.provenance.is_degraded());
        assert_eq!(
            response.passages[0].fused_score,
            crate::hybrid::fusion::rrf_contribution(60.0, 1)
        );
    }

    #[tokio::test]
    async fn test_invalid_queries_rejected() {
        let retriever = HybridRetriever::new(index(), &PilumConfig::default()).unwrap();
        assert!(matches!(
            retriever.query(" \t ", 5).await,
            Err(PilumError::InvalidQuery(_))
        ));
        assert!(matches!(
            retriever.query("kubernetes", 0).await,
            Err(PilumError::InvalidQuery(_))
        ));
        assert_eq!(retriever.stats().invalid_queries, 2);
        assert_eq!(retriever.cache().stats().misses, 0);
    }

    #[tokio::test]
    async fn test_cache_serves_smaller_top_k_only() {
        let retriever = HybridRetriever::new(index(), &PilumConfig::default()).unwrap();

        let first = retriever.query("networking", 1).await.unwrap();
        assert!(!first.provenance.cache_hit);

        let second = retriever.query("NETWORKING", 1).await.unwrap();
        assert!(second.provenance.cache_hit);
        assert_eq!(second.passages, first.passages);

        // A larger request recomputes and replaces the entry.
        let third = retriever.query("networking", 2).await.unwrap();
        assert!(!third.provenance.cache_hit);
        assert_eq!(third.chunk_ids(), vec!["a", "b"]);
        assert_eq!(retriever.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_hybrid_with_vector_search() {
        let embedder = Arc::new(HashEmbedder::new(64));
        let vectors = Arc::new(InMemoryVectorIndex::new(64));
        let index = index();
        for chunk in index.snapshot().chunks() {
            let vector = embedder.embed_sync(&chunk.text).unwrap();
            vectors.upsert(chunk, vector).unwrap();
        }

        let retriever = HybridRetriever::new(index, &PilumConfig::default())
            .unwrap()
            .with_vector_search(embedder, vectors);
        let response = retriever.query("kubernetes networking", 3).await.unwrap();

        assert!(response.provenance.is_hybrid());
        assert_eq!(response.passages[0].chunk_id.as_str(), "a");
        assert_eq!(response.passages[0].contributing_ranks.len(), 2);
        assert_eq!(
            response.provenance.candidates[1].0,
            RetrievalSource::Vector
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch_degrades() {
        let retriever = HybridRetriever::new(index(), &PilumConfig::default())
            .unwrap()
            .with_vector_search(
                Arc::new(HashEmbedder::new(8)),
                Arc::new(InMemoryVectorIndex::new(16)),
            );
        let response = retriever.query("docker", 5).await.unwrap();

        assert_eq!(response.chunk_ids(), vec!["b"]);
        assert_eq!(response.provenance.mode, RetrievalMode::KeywordOnly);
        assert_eq!(
            response.provenance.degradations[0].reason,
            DegradationReason::InvalidVector
        );
        // Degraded answers are not cached by default.
        assert!(retriever.cache().is_empty());
        assert_eq!(retriever.stats().degraded_queries, 1);
    }

    #[tokio::test]
    async fn test_remove_document_clears_cache() {
        let retriever = HybridRetriever::new(index(), &PilumConfig::default()).unwrap();
        retriever.query("networking", 5).await.unwrap();
        assert_eq!(retriever.cache().len(), 1);

        assert!(retriever.remove_document("d1").await.unwrap());
        assert!(retriever.cache().is_empty());
        let response = retriever.query("networking", 5).await.unwrap();
        assert_eq!(response.chunk_ids(), vec!["b"]);

        assert!(!retriever.remove_document("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_now_requires_persistence() {
        let retriever = HybridRetriever::new(index(), &PilumConfig::default()).unwrap();
        assert!(matches!(
            retriever.snapshot_now().await,
            Err(PilumError::InvalidConfig(_))
        ));

        let storage = MemoryStorage::new();
        let retriever = retriever.with_persistence(Arc::new(storage.clone()), "sparse.snapshot");
        assert_eq!(retriever.stats().snapshot_bytes, None);
        let generation = retriever.snapshot_now().await.unwrap();
        assert_eq!(generation, retriever.index().stats().generation);
        assert!(storage.file_exists("sparse.snapshot"));
        assert_eq!(
            retriever.stats().snapshot_bytes,
            storage.read_bytes("sparse.snapshot").map(|b| b.len() as u64)
        );
    }

    #[derive(Debug, Default)]
    struct RecordingRetriever {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Retriever for RecordingRetriever {
        fn source(&self) -> RetrievalSource {
            RetrievalSource::Named("recording".into())
        }

        async fn retrieve(&self, request: &RetrievalRequest) -> Result<RankedList> {
            self.seen.lock().push(request.text.clone());
            Ok(RankedList::empty(self.source()))
        }
    }

    #[tokio::test]
    async fn test_retrievers_get_query_as_written() {
        let recorder = Arc::new(RecordingRetriever::default());
        let retriever = HybridRetriever::new(index(), &PilumConfig::default())
            .unwrap()
            .with_retriever(recorder.clone());

        let response = retriever.query("  Kubernetes   Networking ", 5).await.unwrap();
        assert_eq!(response.query, "kubernetes networking");
        assert_eq!(response.chunk_ids()[0], "a");
        assert_eq!(*recorder.seen.lock(), vec!["Kubernetes   Networking".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_without_maintenance_flushes() {
        let storage = MemoryStorage::new();
        let retriever = HybridRetriever::new(index(), &PilumConfig::default())
            .unwrap()
            .with_persistence(Arc::new(storage.clone()), "sparse.snapshot");
        retriever.shutdown().await.unwrap();
        assert!(storage.file_exists("sparse.snapshot"));
        assert!(!retriever.index().is_dirty());
    }

    #[tokio::test]
    async fn test_remove_routes_through_maintenance() {
        let config = PilumConfig::default().with_cache(CacheConfig::default());
        let retriever = HybridRetriever::new(index(), &config).unwrap();
        retriever.spawn_maintenance();
        retriever.spawn_maintenance();

        assert!(retriever.remove_document("d2").await.unwrap());
        let stats = retriever.stats();
        assert_eq!(stats.maintenance.map(|m| m.rebuilds), Some(1));
        assert_eq!(stats.index.document_count, 2);

        retriever.shutdown().await.unwrap();
        assert!(retriever.stats().maintenance.is_none());
    }
}
