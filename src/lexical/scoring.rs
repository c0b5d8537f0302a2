//! BM25 scoring as pure functions over explicit statistics.
//!
//! Nothing here touches an index: callers pass term frequency, document
//! frequency, chunk length and corpus statistics, which keeps the formula
//! testable on its own.

use serde::{Deserialize, Serialize};

use crate::error::{PilumError, Result};

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term frequency saturation.
    pub k1: f64,

    /// Length normalization strength (0 disables it, 1 is full).
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(PilumError::invalid_config(format!(
                "bm25.k1 must be a non-negative number, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(PilumError::invalid_config(format!(
                "bm25.b must be between 0.0 and 1.0, got {}",
                self.b
            )));
        }
        Ok(())
    }
}

/// Corpus-wide statistics needed by the formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorpusStats {
    /// Number of chunks in the index.
    pub total_chunks: u64,

    /// Mean chunk length in tokens.
    pub average_length: f64,
}

/// Statistics for one query term against one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermStats {
    /// Occurrences of the term in the chunk.
    pub term_frequency: u32,

    /// Number of chunks containing the term.
    pub document_frequency: u64,
}

/// Smoothed inverse document frequency, `ln(1 + (N - df + 0.5) / (df + 0.5))`.
///
/// Never negative, so a term that appears in most chunks still adds a small
/// positive amount instead of penalizing its matches.
pub fn idf(document_frequency: u64, total_chunks: u64) -> f64 {
    let n = total_chunks as f64;
    let df = document_frequency.min(total_chunks) as f64;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Contribution of a single term occurrence in the query.
pub fn term_score(
    term: TermStats,
    chunk_length: u32,
    corpus: &CorpusStats,
    params: &Bm25Params,
) -> f64 {
    if term.term_frequency == 0 || corpus.total_chunks == 0 {
        return 0.0;
    }

    let tf = term.term_frequency as f64;
    let length_ratio = if corpus.average_length > 0.0 {
        chunk_length as f64 / corpus.average_length
    } else {
        1.0
    };
    let norm = params.k1 * (1.0 - params.b + params.b * length_ratio);

    idf(term.document_frequency, corpus.total_chunks) * (tf * (params.k1 + 1.0)) / (tf + norm)
}

/// Score a chunk for a tokenized query. `terms` holds one entry per query
/// token, duplicates included, so a repeated query term weighs more.
pub fn bm25_score(
    terms: &[TermStats],
    chunk_length: u32,
    corpus: &CorpusStats,
    params: &Bm25Params,
) -> f64 {
    terms
        .iter()
        .map(|term| term_score(*term, chunk_length, corpus, params))
        .sum()
}
