//! Tokenizers and query normalization.

use std::fmt::Debug;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NON_ALPHANUMERIC: Regex = Regex::new(r"[^a-z0-9\s]").expect("static pattern");
}

/// Splits text into index terms.
pub trait Tokenizer: Send + Sync + Debug {
    /// Tokenize text into terms. Terms may repeat.
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Stable name recorded in snapshots so a snapshot is never loaded with a
    /// tokenizer that would produce different terms.
    fn name(&self) -> &'static str;
}

/// Lowercases, deletes every character outside `[a-z0-9]` and whitespace,
/// then splits on whitespace. Punctuation inside a word is dropped rather
/// than treated as a separator, so `"don't"` becomes `"dont"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenizer;

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        NON_ALPHANUMERIC
            .replace_all(&lowered, "")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    fn name(&self) -> &'static str {
        "simple"
    }
}

/// Cache-key normalization: lowercase, collapse whitespace runs, trim.
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
