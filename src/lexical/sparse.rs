//! Concurrent BM25 index with copy-on-write updates.
//!
//! Readers clone the current `Arc<InvertedIndex>` under a short read lock and
//! search it without holding any lock. Writers serialize on a mutation lock,
//! build the next version aside and swap it in with a single pointer write,
//! so a query sees either the old corpus or the new one in full.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::analysis::{SimpleTokenizer, Tokenizer};
use crate::chunk::{Chunk, ChunkId, DocumentId};
use crate::error::{PilumError, Result};
use crate::lexical::index::InvertedIndex;
use crate::lexical::scoring::Bm25Params;
use crate::lexical::snapshot::{
    SNAPSHOT_TEMP_SUFFIX, SnapshotHeader, read_snapshot, write_snapshot,
};
use crate::ranking::{RankedHit, RankedList, RetrievalSource};
use crate::storage::{Storage, StorageError};

/// Outcome of opening an index from storage.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    /// A valid snapshot was loaded.
    Loaded { chunks: usize, generation: u64 },
    /// No snapshot existed; the index starts empty.
    Missing,
    /// The snapshot was unreadable; the index starts empty.
    Degraded(String),
}

impl LoadStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, LoadStatus::Degraded(_))
    }
}

/// Point-in-time statistics for the sparse index.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub document_count: usize,
    pub term_count: usize,
    pub average_chunk_length: f64,
    pub generation: u64,
    pub persisted_generation: u64,
    pub dirty: bool,
}

/// The keyword retrieval index.
#[derive(Debug)]
pub struct SparseIndex {
    current: RwLock<Arc<InvertedIndex>>,
    mutation: Mutex<()>,
    tokenizer: Arc<dyn Tokenizer>,
    params: Bm25Params,
    persisted_generation: AtomicU64,
}

impl Default for SparseIndex {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

impl SparseIndex {
    /// An empty index using the default tokenizer.
    pub fn new(params: Bm25Params) -> Self {
        Self::with_tokenizer(Arc::new(SimpleTokenizer), params)
    }

    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>, params: Bm25Params) -> Self {
        SparseIndex {
            current: RwLock::new(Arc::new(InvertedIndex::new())),
            mutation: Mutex::new(()),
            tokenizer,
            params,
            persisted_generation: AtomicU64::new(0),
        }
    }

    /// Build an index over an existing corpus.
    pub fn from_chunks<I>(chunks: I, params: Bm25Params) -> Self
    where
        I: IntoIterator<Item = Chunk>,
    {
        let index = Self::new(params);
        index.insert(chunks);
        index
    }

    /// Open the snapshot `name` from `storage`. A missing or unreadable
    /// snapshot is not an error: the index starts empty and the returned
    /// status says why.
    pub fn open(storage: &dyn Storage, name: &str, params: Bm25Params) -> (Self, LoadStatus) {
        let index = Self::new(params);
        let status = index.load_or_empty(storage, name);
        (index, status)
    }

    /// Replace the current contents with the snapshot `name`, falling back to
    /// an empty index when it is missing or corrupt.
    pub fn load_or_empty(&self, storage: &dyn Storage, name: &str) -> LoadStatus {
        let mut input = match storage.open_input(name) {
            Ok(input) => input,
            Err(PilumError::Storage(StorageError::FileNotFound(_))) => {
                info!("No sparse index snapshot at {name}; starting empty");
                self.replace(InvertedIndex::new(), 0);
                return LoadStatus::Missing;
            }
            Err(err) => return self.degrade(name, err),
        };

        match self.load_snapshot(&mut input) {
            Ok(header) => {
                let snapshot = self.snapshot();
                info!(
                    "Loaded sparse index snapshot {name}: {} chunks, generation {}, written {}",
                    snapshot.chunk_count(),
                    snapshot.generation(),
                    header.created_at.to_rfc3339()
                );
                LoadStatus::Loaded {
                    chunks: snapshot.chunk_count(),
                    generation: snapshot.generation(),
                }
            }
            Err(err) => self.degrade(name, err),
        }
    }

    fn degrade(&self, name: &str, err: PilumError) -> LoadStatus {
        warn!("Sparse index snapshot {name} unusable, starting with an empty index: {err}");
        self.replace(InvertedIndex::new(), 0);
        LoadStatus::Degraded(err.to_string())
    }

    /// The current corpus version. Holding it never blocks writers.
    pub fn snapshot(&self) -> Arc<InvertedIndex> {
        Arc::clone(&self.current.read())
    }

    fn swap(&self, next: InvertedIndex) -> Arc<InvertedIndex> {
        let mut guard = self.current.write();
        std::mem::replace(&mut *guard, Arc::new(next))
    }

    fn replace(&self, next: InvertedIndex, persisted_generation: u64) {
        let _guard = self.mutation.lock();
        self.swap(next);
        self.persisted_generation
            .store(persisted_generation, Ordering::Release);
    }

    /// Add chunks to the index and return how many were new.
    pub fn insert<I>(&self, chunks: I) -> usize
    where
        I: IntoIterator<Item = Chunk>,
    {
        let _guard = self.mutation.lock();
        let mut next = InvertedIndex::clone(&self.snapshot());
        let inserted = next.insert(chunks, self.tokenizer.as_ref());
        if inserted > 0 {
            let generation = next.generation();
            self.swap(next);
            debug!("Inserted {inserted} chunks, sparse index generation {generation}");
        }
        inserted
    }

    /// Remove every chunk of a document by rebuilding the index from the
    /// remaining corpus. Queries keep using the previous version until the
    /// rebuilt one is swapped in. Returns `false` when the document was not
    /// indexed.
    pub fn remove_document(&self, document_id: &DocumentId) -> bool {
        let _guard = self.mutation.lock();
        let current = self.snapshot();
        match current.without_document(document_id, self.tokenizer.as_ref()) {
            Some(rebuilt) => {
                debug!(
                    "Rebuilt sparse index without document {document_id}: {} -> {} chunks",
                    current.chunk_count(),
                    rebuilt.chunk_count()
                );
                self.swap(rebuilt);
                true
            }
            None => {
                debug!("Document {document_id} not indexed; nothing to remove");
                false
            }
        }
    }

    /// BM25 search over the current version.
    pub fn search(&self, text: &str, top_k: usize) -> Vec<RankedHit> {
        let terms = self.tokenizer.tokenize(text);
        self.snapshot().search(&terms, top_k, &self.params)
    }

    /// [`SparseIndex::search`] as a keyword [`RankedList`] for fusion.
    pub fn search_ranked(&self, text: &str, top_k: usize) -> RankedList {
        RankedList::new(RetrievalSource::Keyword, self.search(text, top_k))
    }

    /// Write the current version to `writer`.
    pub fn save_snapshot<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let snapshot = self.snapshot();
        write_snapshot(writer, &snapshot, self.tokenizer.name())?;
        Ok(snapshot.generation())
    }

    /// Replace the contents with a snapshot read from `reader`. On error the
    /// current contents are left untouched.
    pub fn load_snapshot<R: Read>(&self, reader: &mut R) -> Result<SnapshotHeader> {
        let (header, index) = read_snapshot(reader, self.tokenizer.name())?;
        let generation = index.generation();
        self.replace(index, generation);
        Ok(header)
    }

    /// Persist the current version as `name`, writing a temporary sibling
    /// first and renaming it into place. Returns the generation written.
    pub fn persist(&self, storage: &dyn Storage, name: &str) -> Result<u64> {
        let snapshot = self.snapshot();
        let temp_name = format!("{name}{SNAPSHOT_TEMP_SUFFIX}");

        if let Err(err) = self.write_to(storage, &snapshot, &temp_name, name) {
            if let Err(cleanup) = storage.delete_file(&temp_name) {
                debug!("Failed to remove {temp_name}: {cleanup}");
            }
            return Err(err);
        }

        self.persisted_generation
            .fetch_max(snapshot.generation(), Ordering::AcqRel);
        debug!(
            "Persisted sparse index generation {} to {name}",
            snapshot.generation()
        );
        Ok(snapshot.generation())
    }

    fn write_to(
        &self,
        storage: &dyn Storage,
        snapshot: &InvertedIndex,
        temp_name: &str,
        name: &str,
    ) -> Result<()> {
        let mut output = storage.create_output(temp_name)?;
        write_snapshot(&mut output, snapshot, self.tokenizer.name())?;
        output.close()?;
        storage.rename_file(temp_name, name)?;
        storage.sync()
    }

    /// Persist only if something changed since the last successful persist.
    pub fn persist_if_dirty(&self, storage: &dyn Storage, name: &str) -> Result<Option<u64>> {
        if !self.is_dirty() {
            return Ok(None);
        }
        self.persist(storage, name).map(Some)
    }

    /// Whether the current version differs from the last one persisted.
    pub fn is_dirty(&self) -> bool {
        self.snapshot().generation() != self.persisted_generation.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> IndexStats {
        let snapshot = self.snapshot();
        let persisted_generation = self.persisted_generation.load(Ordering::Acquire);
        IndexStats {
            chunk_count: snapshot.chunk_count(),
            document_count: snapshot.document_count(),
            term_count: snapshot.term_count(),
            average_chunk_length: snapshot.corpus_stats().average_length,
            generation: snapshot.generation(),
            persisted_generation,
            dirty: snapshot.generation() != persisted_generation,
        }
    }

    pub fn chunk(&self, chunk_id: &ChunkId) -> Option<Arc<Chunk>> {
        self.snapshot().chunk(chunk_id).cloned()
    }

    pub fn contains_document(&self, document_id: &DocumentId) -> bool {
        self.snapshot().contains_document(document_id)
    }

    pub fn chunk_ids_for(&self, document_id: &DocumentId) -> Vec<ChunkId> {
        self.snapshot().chunk_ids_for(document_id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().chunk_count()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn params(&self) -> &Bm25Params {
        &self.params
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn sample() -> SparseIndex {
        SparseIndex::from_chunks(
            vec![
                Chunk::new("a", "d1", "kubernetes networking"),
                Chunk::new("b", "d2", "docker networking"),
                Chunk::new("c", "d3", "sourdough starter feeding schedule"),
            ],
            Bm25Params::default(),
        )
    }

    fn ids(hits: &[RankedHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_search_kubernetes() {
        let index = sample();
        assert_eq!(ids(&index.search("Kubernetes", 5)), vec!["a"]);
        assert!(index.search("quantum chromodynamics", 5).is_empty());
        assert!(SparseIndex::default().search("anything", 5).is_empty());
    }

    #[test]
    fn test_search_ranked_matches_search() {
        let index = sample();
        let list = index.search_ranked("networking", 5);
        assert_eq!(list.source, RetrievalSource::Keyword);
        assert_eq!(list.len(), 2);
        assert_eq!(list.hits, index.search("networking", 5));
    }

    #[test]
    fn test_remove_document_twice() {
        let index = sample();
        let before = index.stats().generation;

        assert!(index.remove_document(&DocumentId::from("d1")));
        assert!(index.search("kubernetes", 5).is_empty());
        assert_eq!(ids(&index.search("networking", 5)), vec!["b"]);
        let after = index.stats().generation;
        assert_eq!(after, before + 1);

        assert!(!index.remove_document(&DocumentId::from("d1")));
        assert_eq!(index.stats().generation, after);
        assert!(!index.remove_document(&DocumentId::from("never-there")));
    }

    #[test]
    fn test_readers_keep_old_version_across_swap() {
        let index = sample();
        let held = index.snapshot();
        index.remove_document(&DocumentId::from("d1"));

        assert!(held.chunk(&ChunkId::from("a")).is_some());
        assert!(index.chunk(&ChunkId::from("a")).is_none());
    }

    #[test]
    fn test_dirty_tracking_and_persist() {
        let storage = MemoryStorage::new();
        let index = sample();
        assert!(index.is_dirty());

        let generation = index.persist(&storage, "sparse.snapshot").unwrap();
        assert_eq!(generation, index.stats().generation);
        assert!(!index.is_dirty());
        assert!(storage.file_exists("sparse.snapshot"));
        assert!(!storage.file_exists("sparse.snapshot.tmp"));
        assert_eq!(index.persist_if_dirty(&storage, "sparse.snapshot").unwrap(), None);

        index.insert(vec![Chunk::new("d", "d4", "helm charts")]);
        assert!(index.is_dirty());
        assert!(index.persist_if_dirty(&storage, "sparse.snapshot").unwrap().is_some());
    }

    #[test]
    fn test_open_roundtrip_reproduces_results() {
        let storage = MemoryStorage::new();
        let index = sample();
        index.persist(&storage, "idx").unwrap();

        let (reopened, status) = SparseIndex::open(&storage, "idx", Bm25Params::default());
        assert_eq!(
            status,
            LoadStatus::Loaded {
                chunks: 3,
                generation: index.stats().generation
            }
        );
        assert!(!reopened.is_dirty());
        for query in ["networking", "kubernetes docker", "feeding"] {
            assert_eq!(reopened.search(query, 5), index.search(query, 5));
        }
    }

    #[test]
    fn test_open_missing_and_corrupt() {
        let storage = MemoryStorage::new();
        let (index, status) = SparseIndex::open(&storage, "idx", Bm25Params::default());
        assert_eq!(status, LoadStatus::Missing);
        assert!(index.is_empty());

        storage.write_bytes("idx", b"PLMXgarbage".to_vec());
        let (index, status) = SparseIndex::open(&storage, "idx", Bm25Params::default());
        assert!(status.is_degraded());
        assert!(index.is_empty());
    }

    #[test]
    fn test_failed_load_keeps_contents() {
        let index = sample();
        let err = index.load_snapshot(&mut &b"nope"[..]).unwrap_err();
        assert!(matches!(err, PilumError::IndexCorrupt(_)));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_stats() {
        let index = sample();
        let stats = index.stats();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.document_count, 3);
        assert_eq!(stats.term_count, 7);
        assert!(stats.dirty);
        assert!(index.contains_document(&DocumentId::from("d2")));
        assert_eq!(
            index.chunk_ids_for(&DocumentId::from("d2")),
            vec![ChunkId::from("b")]
        );
    }
}
