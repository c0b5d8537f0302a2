//! Keyword retrieval over an inverted index with BM25 scoring.
//!
//! [`SparseIndex`] is the entry point: it owns the current
//! [`InvertedIndex`] version, applies inserts and document removals by
//! copy-on-write, and reads/writes snapshots.

pub mod index;
pub mod scoring;
mod sharded;
pub mod snapshot;
pub mod sparse;

pub use index::{InvertedIndex, PostingList};
pub use scoring::{Bm25Params, CorpusStats, TermStats, bm25_score, idf};
pub use snapshot::{SNAPSHOT_FORMAT_VERSION, SnapshotHeader};
pub use sparse::{IndexStats, LoadStatus, SparseIndex};
