//! Reciprocal rank fusion.
//!
//! Each list contributes `1 / (k + rank)` for every chunk it contains, with
//! 1-based ranks. Scores inside the lists are ignored, so fusing BM25 output
//! with cosine similarities needs no normalization.

use std::cmp::Ordering;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkId;
use crate::error::{PilumError, Result};
use crate::ranking::{RankedList, RetrievalSource};

/// Fusion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// RRF smoothing constant.
    pub k: f64,

    /// Number of fused results kept.
    pub top_n: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig { k: 60.0, top_n: 5 }
    }
}

impl FusionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_k(mut self, k: f64) -> Self {
        self.k = k;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.k.is_finite() || self.k < 0.0 {
            return Err(PilumError::invalid_config(format!(
                "fusion.k must be a non-negative number, got {}",
                self.k
            )));
        }
        if self.top_n == 0 {
            return Err(PilumError::invalid_config(
                "fusion.top_n must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// How one list contributed to a fused score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingRank {
    pub source: RetrievalSource,
    /// 1-based rank within that list.
    pub rank: usize,
    pub contribution: f64,
}

/// A fused result entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    pub chunk_id: ChunkId,
    pub fused_score: f64,
    /// One entry per list the chunk appeared in, in list order.
    pub contributing_ranks: Vec<ContributingRank>,
}

/// Contribution of a 1-based rank.
pub fn rrf_contribution(k: f64, rank: usize) -> f64 {
    1.0 / (k + rank as f64)
}

/// Fuse ranked lists into at most `config.top_n` entries ordered by
/// descending fused score, ties broken by ascending chunk id.
///
/// Only chunks present in some input list can appear in the output. If a
/// list repeats a chunk, only its first (best) rank counts.
pub fn reciprocal_rank_fusion(lists: &[RankedList], config: &FusionConfig) -> Vec<FusedHit> {
    let mut fused: AHashMap<&ChunkId, FusedHit> = AHashMap::new();

    for list in lists {
        for (position, hit) in list.hits.iter().enumerate() {
            let rank = position + 1;
            let entry = fused.entry(&hit.chunk_id).or_insert_with(|| FusedHit {
                chunk_id: hit.chunk_id.clone(),
                fused_score: 0.0,
                contributing_ranks: Vec::with_capacity(lists.len()),
            });
            if entry
                .contributing_ranks
                .iter()
                .any(|c| c.source == list.source)
            {
                continue;
            }
            let contribution = rrf_contribution(config.k, rank);
            entry.fused_score += contribution;
            entry.contributing_ranks.push(ContributingRank {
                source: list.source.clone(),
                rank,
                contribution,
            });
        }
    }

    let mut results: Vec<FusedHit> = fused.into_values().collect();
    results.sort_by(compare_fused);
    results.truncate(config.top_n);
    results
}

fn compare_fused(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::RankedHit;

    fn list(source: RetrievalSource, ids: &[(&str, f64)]) -> RankedList {
        RankedList::new(
            source,
            ids.iter().map(|(id, s)| RankedHit::new(*id, *s)).collect(),
        )
    }

    fn ids(hits: &[FusedHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_kubernetes_scenario() {
        let vector = list(
            RetrievalSource::Vector,
            &[("B", 0.9), ("A", 0.8), ("C", 0.1)],
        );
        let keyword = list(RetrievalSource::Keyword, &[("A", 2.3)]);
        let fused = reciprocal_rank_fusion(&[keyword, vector], &FusionConfig::default());

        assert_eq!(ids(&fused), vec!["A", "B", "C"]);
        assert!((fused[0].fused_score - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert!((fused[0].fused_score - 0.0325).abs() < 1e-4);
        assert!((fused[1].fused_score - 1.0 / 61.0).abs() < 1e-12);
        assert!((fused[2].fused_score - 1.0 / 63.0).abs() < 1e-12);

        let ranks: Vec<_> = fused[0]
            .contributing_ranks
            .iter()
            .map(|c| (c.source.clone(), c.rank))
            .collect();
        assert_eq!(
            ranks,
            vec![(RetrievalSource::Keyword, 1), (RetrievalSource::Vector, 2)]
        );
    }

    #[test]
    fn test_scale_invariance() {
        let a = list(RetrievalSource::Keyword, &[("x", 10.0), ("y", 5.0), ("z", 1.0)]);
        let b = list(RetrievalSource::Vector, &[("z", 0.9), ("x", 0.5)]);
        let scaled_a = list(
            RetrievalSource::Keyword,
            &[("x", 10_000.0), ("y", 0.02), ("z", 0.01)],
        );
        let scaled_b = list(RetrievalSource::Vector, &[("z", -1.0), ("x", -7.0)]);

        let config = FusionConfig::default();
        assert_eq!(
            reciprocal_rank_fusion(&[a, b], &config),
            reciprocal_rank_fusion(&[scaled_a, scaled_b], &config)
        );
    }

    #[test]
    fn test_single_list_preserves_order() {
        let keyword = list(RetrievalSource::Keyword, &[("c", 3.0), ("a", 2.0), ("b", 1.0)]);
        let fused = reciprocal_rank_fusion(
            &[keyword, RankedList::empty(RetrievalSource::Vector)],
            &FusionConfig::default(),
        );
        assert_eq!(ids(&fused), vec!["c", "a", "b"]);
        assert!(fused.iter().all(|h| h.contributing_ranks.len() == 1));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(reciprocal_rank_fusion(&[], &FusionConfig::default()).is_empty());
        let empties = [
            RankedList::empty(RetrievalSource::Keyword),
            RankedList::empty(RetrievalSource::Vector),
        ];
        assert!(reciprocal_rank_fusion(&empties, &FusionConfig::default()).is_empty());
    }

    #[test]
    fn test_top_n_and_ties() {
        let keyword = list(RetrievalSource::Keyword, &[("b", 1.0)]);
        let vector = list(RetrievalSource::Vector, &[("a", 1.0)]);
        let fused = reciprocal_rank_fusion(&[keyword, vector], &FusionConfig::new().with_top_n(1));
        assert_eq!(ids(&fused), vec!["a"]);
    }

    #[test]
    fn test_duplicate_within_list_counts_once() {
        let keyword = list(RetrievalSource::Keyword, &[("a", 2.0), ("a", 1.0), ("b", 0.5)]);
        let fused = reciprocal_rank_fusion(&[keyword], &FusionConfig::default());
        assert_eq!(fused[0].fused_score, rrf_contribution(60.0, 1));
        assert_eq!(fused[1].contributing_ranks[0].rank, 3);
    }

    #[test]
    fn test_three_lists() {
        let keyword = list(RetrievalSource::Keyword, &[("a", 1.0)]);
        let vector = list(RetrievalSource::Vector, &[("b", 1.0)]);
        let rerank = list(RetrievalSource::Named("rerank".into()), &[("b", 1.0)]);
        let fused = reciprocal_rank_fusion(&[keyword, vector, rerank], &FusionConfig::default());
        assert_eq!(ids(&fused), vec!["b", "a"]);
    }

    #[test]
    fn test_config_validation() {
        assert!(FusionConfig::default().validate().is_ok());
        assert!(FusionConfig::new().with_top_n(0).validate().is_err());
        assert!(FusionConfig::new().with_k(-1.0).validate().is_err());
    }
}
