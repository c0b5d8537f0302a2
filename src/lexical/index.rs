//! The immutable-by-convention corpus structure behind the sparse index.
//!
//! An [`InvertedIndex`] value is never mutated while it is shared: writers
//! clone it, apply a change and publish the clone. Its maps are sharded
//! behind `Arc` and posting lists are `Arc`s too, so a clone costs pointer
//! copies and only the shards and lists an insert touches are duplicated.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ahash::AHashMap;
use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analysis::Tokenizer;
use crate::chunk::{Chunk, ChunkId, DocumentId};
use crate::error::{PilumError, Result};
use crate::lexical::scoring::{Bm25Params, CorpusStats, TermStats, term_score};
use crate::lexical::sharded::ShardedMap;
use crate::ranking::{RankedHit, compare_hits};

/// Chunks containing one term, with the term's frequency in each.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostingList {
    postings: BTreeMap<ChunkId, u32>,
}

impl PostingList {
    /// Number of chunks containing the term.
    pub fn document_frequency(&self) -> u64 {
        self.postings.len() as u64
    }

    pub fn term_frequency(&self, chunk_id: &ChunkId) -> Option<u32> {
        self.postings.get(chunk_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChunkId, u32)> {
        self.postings.iter().map(|(id, tf)| (id, *tf))
    }
}

/// A stored chunk and its token length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Arc<Chunk>,
    pub length: u32,
}

/// Tokenized form of a chunk, produced before it enters the index.
#[derive(Debug)]
struct AnalyzedChunk {
    chunk: Arc<Chunk>,
    length: u32,
    frequencies: AHashMap<String, u32>,
}

fn analyze(tokenizer: &dyn Tokenizer, chunk: Arc<Chunk>) -> AnalyzedChunk {
    let tokens = tokenizer.tokenize(&chunk.text);
    let length = tokens.len() as u32;
    let mut frequencies = AHashMap::with_capacity(tokens.len());
    for token in tokens {
        *frequencies.entry(token).or_insert(0) += 1;
    }
    AnalyzedChunk {
        chunk,
        length,
        frequencies,
    }
}

/// Postings, per-chunk lengths and document membership for a corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    chunks: ShardedMap<ChunkId, IndexedChunk>,
    postings: ShardedMap<String, Arc<PostingList>>,
    documents: ShardedMap<DocumentId, BTreeSet<ChunkId>>,
    total_length: u64,
    generation: u64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a full corpus. Tokenization runs in parallel.
    pub fn build<I>(chunks: I, tokenizer: &dyn Tokenizer) -> Self
    where
        I: IntoIterator<Item = Arc<Chunk>>,
    {
        let chunks: Vec<Arc<Chunk>> = chunks.into_iter().collect();
        let analyzed: Vec<AnalyzedChunk> = chunks
            .into_par_iter()
            .map(|chunk| analyze(tokenizer, chunk))
            .collect();

        let mut index = InvertedIndex::new();
        for chunk in analyzed {
            index.add_analyzed(chunk);
        }
        index
    }

    /// Add chunks, returning how many were new. A chunk whose id is already
    /// indexed is skipped; chunks are immutable once ingested. Bumps the
    /// generation when anything changed.
    pub fn insert<I>(&mut self, chunks: I, tokenizer: &dyn Tokenizer) -> usize
    where
        I: IntoIterator<Item = Chunk>,
    {
        let mut inserted = 0;
        for chunk in chunks {
            if let Some(existing) = self.chunks.get(chunk.chunk_id.as_str()) {
                warn!(
                    "Skipping chunk {}: id already indexed for document {}",
                    chunk.chunk_id, existing.chunk.document_id
                );
                continue;
            }
            if self.add_analyzed(analyze(tokenizer, Arc::new(chunk))) {
                inserted += 1;
            }
        }
        if inserted > 0 {
            self.generation += 1;
        }
        inserted
    }

    fn add_analyzed(&mut self, analyzed: AnalyzedChunk) -> bool {
        let chunk_id = analyzed.chunk.chunk_id.clone();
        if self.chunks.contains_key(chunk_id.as_str()) {
            warn!("Skipping duplicate chunk {chunk_id}");
            return false;
        }

        for (term, tf) in analyzed.frequencies {
            Arc::make_mut(self.postings.entry(term).or_default())
                .postings
                .insert(chunk_id.clone(), tf);
        }
        self.documents
            .entry(analyzed.chunk.document_id.clone())
            .or_default()
            .insert(chunk_id.clone());
        self.total_length += analyzed.length as u64;
        self.chunks.insert(
            chunk_id,
            IndexedChunk {
                chunk: analyzed.chunk,
                length: analyzed.length,
            },
        );
        true
    }

    /// A fresh index over every chunk except those of `document_id`, or `None`
    /// when the document is not indexed. The result is rebuilt from scratch so
    /// all statistics are recomputed.
    pub fn without_document(
        &self,
        document_id: &DocumentId,
        tokenizer: &dyn Tokenizer,
    ) -> Option<InvertedIndex> {
        let removed = self.documents.get(document_id.as_str())?;
        let remaining = self
            .chunks
            .iter()
            .filter(|(id, _)| !removed.contains(*id))
            .map(|(_, indexed)| Arc::clone(&indexed.chunk));

        let mut rebuilt = InvertedIndex::build(remaining, tokenizer);
        rebuilt.generation = self.generation + 1;
        Some(rebuilt)
    }

    /// Score every chunk containing at least one query term.
    ///
    /// `terms` is the tokenized query; a repeated term counts once per
    /// occurrence. Only positive scores are returned, best first, ties broken
    /// by ascending chunk id.
    pub fn search(&self, terms: &[String], top_k: usize, params: &Bm25Params) -> Vec<RankedHit> {
        if top_k == 0 || terms.is_empty() || self.chunks.is_empty() {
            return Vec::new();
        }

        let corpus = self.corpus_stats();
        let mut scores: AHashMap<&ChunkId, f64> = AHashMap::new();

        for term in terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let document_frequency = list.document_frequency();
            for (chunk_id, term_frequency) in list.iter() {
                let length = self.chunks.get(chunk_id.as_str()).map_or(0, |c| c.length);
                let stats = TermStats {
                    term_frequency,
                    document_frequency,
                };
                *scores.entry(chunk_id).or_insert(0.0) +=
                    term_score(stats, length, &corpus, params);
            }
        }

        let mut hits: Vec<RankedHit> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(chunk_id, score)| RankedHit::new(chunk_id.clone(), score))
            .collect();
        hits.sort_by(compare_hits);
        hits.truncate(top_k);
        hits
    }

    pub fn corpus_stats(&self) -> CorpusStats {
        let total_chunks = self.chunks.len() as u64;
        let average_length = if total_chunks == 0 {
            0.0
        } else {
            self.total_length as f64 / total_chunks as f64
        };
        CorpusStats {
            total_chunks,
            average_length,
        }
    }

    /// Check internal consistency after decoding from an untrusted source.
    pub fn verify(&self) -> Result<()> {
        if !(self.chunks.is_well_formed()
            && self.postings.is_well_formed()
            && self.documents.is_well_formed())
        {
            return Err(PilumError::corrupt("shard layout does not match keys"));
        }

        let mut total_length = 0u64;
        for (id, indexed) in self.chunks.iter() {
            if &indexed.chunk.chunk_id != id {
                return Err(PilumError::corrupt(format!("chunk {id} stored under wrong key")));
            }
            let listed = self
                .documents
                .get(indexed.chunk.document_id.as_str())
                .is_some_and(|ids| ids.contains(id));
            if !listed {
                return Err(PilumError::corrupt(format!(
                    "chunk {id} missing from document {}",
                    indexed.chunk.document_id
                )));
            }
            total_length += indexed.length as u64;
        }
        if total_length != self.total_length {
            return Err(PilumError::corrupt(format!(
                "total length {} does not match chunk lengths {total_length}",
                self.total_length
            )));
        }

        let membership: usize = self.documents.values().map(BTreeSet::len).sum();
        if membership != self.chunks.len() {
            return Err(PilumError::corrupt("document membership out of sync"));
        }

        for (term, list) in self.postings.iter() {
            if list.postings.is_empty() {
                return Err(PilumError::corrupt(format!("empty posting list for {term:?}")));
            }
            for (id, tf) in list.iter() {
                if tf == 0 || !self.chunks.contains_key(id.as_str()) {
                    return Err(PilumError::corrupt(format!(
                        "posting for {term:?} references unknown chunk {id}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn chunk(&self, chunk_id: &ChunkId) -> Option<&Arc<Chunk>> {
        self.chunks.get(chunk_id.as_str()).map(|indexed| &indexed.chunk)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.chunks.values().map(|indexed| &indexed.chunk)
    }

    pub fn posting_list(&self, term: &str) -> Option<&PostingList> {
        self.postings.get(term).map(Arc::as_ref)
    }

    pub fn contains_document(&self, document_id: &DocumentId) -> bool {
        self.documents.contains_key(document_id.as_str())
    }

    /// Chunk ids of a document in ascending order.
    pub fn chunk_ids_for(&self, document_id: &DocumentId) -> Vec<ChunkId> {
        self.documents
            .get(document_id.as_str())
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Monotonic version, bumped by every mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SimpleTokenizer;

    fn terms(text: &str) -> Vec<String> {
        SimpleTokenizer.tokenize(text)
    }

    fn sample() -> InvertedIndex {
        let mut index = InvertedIndex::new();
        index.insert(
            vec![
                Chunk::new("a", "d1", "kubernetes networking"),
                Chunk::new("b", "d2", "docker networking"),
                Chunk::new("c", "d3", "gardening tips for spring"),
            ],
            &SimpleTokenizer,
        );
        index
    }

    #[test]
    fn test_insert_updates_statistics() {
        let index = sample();
        assert_eq!(index.chunk_count(), 3);
        assert_eq!(index.document_count(), 3);
        assert_eq!(index.generation(), 1);
        assert_eq!(
            index.posting_list("networking").unwrap().document_frequency(),
            2
        );
        let stats = index.corpus_stats();
        assert_eq!(stats.total_chunks, 3);
        assert!((stats.average_length - 8.0 / 3.0).abs() < 1e-12);
        index.verify().unwrap();
    }

    #[test]
    fn test_search_matches_only_query_terms() {
        let index = sample();
        let hits = index.search(&terms("Kubernetes"), 5, &Bm25Params::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id.as_str(), "a");

        let hits = index.search(&terms("networking"), 5, &Bm25Params::default());
        let ids: Vec<_> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        // Equal length and tf: tie broken by id.
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_search_empty_cases() {
        let index = sample();
        let params = Bm25Params::default();
        assert!(index.search(&terms("quantum"), 5, &params).is_empty());
        assert!(index.search(&[], 5, &params).is_empty());
        assert!(index.search(&terms("networking"), 0, &params).is_empty());
        assert!(InvertedIndex::new().search(&terms("x"), 5, &params).is_empty());
    }

    #[test]
    fn test_search_truncates_to_top_k() {
        let index = sample();
        let hits = index.search(&terms("networking tips"), 2, &Bm25Params::default());
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_duplicate_chunk_ids_are_skipped() {
        let mut index = sample();
        let inserted = index.insert(
            vec![
                Chunk::new("a", "d9", "replacement text"),
                Chunk::new("e", "d1", "extra kubernetes"),
            ],
            &SimpleTokenizer,
        );
        assert_eq!(inserted, 1);
        assert_eq!(index.chunk(&ChunkId::from("a")).unwrap().text, "kubernetes networking");
        assert!(!index.contains_document(&DocumentId::from("d9")));
        assert_eq!(
            index.chunk_ids_for(&DocumentId::from("d1")),
            vec![ChunkId::from("a"), ChunkId::from("e")]
        );
        assert_eq!(index.generation(), 2);

        let unchanged = index.insert(vec![Chunk::new("e", "d1", "again")], &SimpleTokenizer);
        assert_eq!(unchanged, 0);
        assert_eq!(index.generation(), 2);
    }

    #[test]
    fn test_without_document_rebuilds() {
        let index = sample();
        let rebuilt = index
            .without_document(&DocumentId::from("d1"), &SimpleTokenizer)
            .unwrap();
        assert_eq!(rebuilt.chunk_count(), 2);
        assert!(rebuilt.posting_list("kubernetes").is_none());
        assert_eq!(
            rebuilt.posting_list("networking").unwrap().document_frequency(),
            1
        );
        assert_eq!(rebuilt.generation(), index.generation() + 1);
        rebuilt.verify().unwrap();

        assert!(
            index
                .without_document(&DocumentId::from("missing"), &SimpleTokenizer)
                .is_none()
        );
    }

    #[test]
    fn test_build_matches_incremental_insert() {
        let chunks = vec![
            Chunk::new("a", "d1", "kubernetes networking"),
            Chunk::new("b", "d2", "docker networking"),
        ];
        let built = InvertedIndex::build(chunks.iter().cloned().map(Arc::new), &SimpleTokenizer);
        let mut inserted = InvertedIndex::new();
        inserted.insert(chunks, &SimpleTokenizer);

        let params = Bm25Params::default();
        let query = terms("networking kubernetes");
        assert_eq!(
            built.search(&query, 5, &params),
            inserted.search(&query, 5, &params)
        );
    }

    #[test]
    fn test_clone_shares_untouched_postings() {
        let index = sample();
        let mut next = index.clone();
        next.insert(vec![Chunk::new("d", "d4", "kubernetes")], &SimpleTokenizer);

        let list = |index: &InvertedIndex, term: &str| Arc::clone(index.postings.get(term).unwrap());
        assert!(Arc::ptr_eq(&list(&index, "docker"), &list(&next, "docker")));
        assert!(!Arc::ptr_eq(&list(&index, "kubernetes"), &list(&next, "kubernetes")));

        // The new chunk's shard was copied; the old version still lacks it.
        assert!(!next.chunks.shares_shard_with(&index.chunks, "d"));
        assert!(index.chunk(&ChunkId::from("d")).is_none());
        assert!(!next.documents.shares_shard_with(&index.documents, "d4"));
        assert_eq!(
            index.posting_list("kubernetes").unwrap().document_frequency(),
            1
        );
    }

    #[test]
    fn test_snapshot_encoding_keeps_shard_layout() {
        let index = sample();
        let bytes = bincode::serialize(&index).unwrap();
        let decoded: InvertedIndex = bincode::deserialize(&bytes).unwrap();
        decoded.verify().unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_verify_detects_inconsistency() {
        let mut index = sample();
        index.total_length += 1;
        assert!(matches!(index.verify(), Err(PilumError::IndexCorrupt(_))));
    }
}
