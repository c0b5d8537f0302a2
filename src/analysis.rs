//! Text analysis for Pilum.
//!
//! Ingestion and query share one tokenizer so that postings and query terms
//! agree. Cache keys use a separate, lighter normalization.

pub mod tokenizer;

pub use tokenizer::{SimpleTokenizer, Tokenizer, normalize_query};
