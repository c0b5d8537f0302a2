//! Chunk data model.
//!
//! A [`Chunk`] is the immutable unit of retrievable text produced by an
//! external ingestion pipeline. The core reads chunks but never edits them;
//! a chunk disappears only when its owning document is removed.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::tokenizer::{SimpleTokenizer, Tokenizer};

/// Unique identifier of a chunk. Ordering is lexicographic and is used as the
/// deterministic tie-breaker in every ranking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

/// Identifier of the document that owns a set of chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(ChunkId);
string_id!(DocumentId);

/// Kind of source a document was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Youtube,
    Web,
    #[default]
    Text,
}

/// Position of a chunk inside its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// 1-based page number of a paginated source.
    Page(u32),
    /// Offset into a timed source such as a video transcript.
    Timestamp { millis: u64 },
    /// Location of a scraped web page.
    Url(String),
}

/// Provenance of a chunk's text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub locator: Option<Locator>,
    /// Human-readable name of the source (file name, video title, URL).
    #[serde(default)]
    pub source_name: Option<String>,
}

impl SourceMetadata {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            ..Default::default()
        }
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }
}

/// Immutable unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    #[serde(default)]
    pub token_count: u32,
    #[serde(default)]
    pub source_metadata: SourceMetadata,
}

impl Chunk {
    /// Create a chunk; `token_count` is derived with the default tokenizer.
    pub fn new(
        chunk_id: impl Into<ChunkId>,
        document_id: impl Into<DocumentId>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let token_count = SimpleTokenizer.tokenize(&text).len() as u32;
        Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            text,
            token_count,
            source_metadata: SourceMetadata::default(),
        }
    }

    /// Attach source metadata.
    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.source_metadata = metadata;
        self
    }
}
