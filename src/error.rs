//! Error types for the Pilum library.
//!
//! All fallible operations return [`PilumError`]. Adapter failures
//! (`AdapterTimeout`, `AdapterUnavailable`, `InvalidVector`, `Embedding`) are
//! absorbed by the retrieval orchestrator and surface only as degraded
//! provenance; `InvalidQuery` is the one error a query caller normally sees.
//!
//! # Examples
//!
//! ```
//! use pilum::error::{PilumError, Result};
//!
//! fn reject() -> Result<()> {
//!     Err(PilumError::invalid_query("query text is empty"))
//! }
//!
//! assert!(matches!(reject(), Err(PilumError::InvalidQuery(_))));
//! ```

use std::io;

use thiserror::Error;

use crate::storage::StorageError;

/// The main error type for Pilum operations.
#[derive(Error, Debug)]
pub enum PilumError {
    /// I/O errors (snapshot files, CLI input).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend errors.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A snapshot could not be decoded or failed validation.
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// Query text was empty or otherwise unusable.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The vector search adapter did not answer within its deadline.
    #[error("Adapter timeout: {0}")]
    AdapterTimeout(String),

    /// The vector search adapter is unreachable or refused the request.
    #[error("Adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// A query or stored vector had the wrong dimension or non-finite values.
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// The embedding collaborator failed to produce a vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Binary serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation cancelled.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// An error with context attached on the way up; displays the whole chain.
    #[error("{0:#}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with PilumError.
pub type Result<T> = std::result::Result<T, PilumError>;

impl PilumError {
    /// Create a new index-corrupt error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        PilumError::IndexCorrupt(msg.into())
    }

    /// Create a new invalid query error.
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidQuery(msg.into())
    }

    /// Create a new adapter timeout error.
    pub fn adapter_timeout<S: Into<String>>(msg: S) -> Self {
        PilumError::AdapterTimeout(msg.into())
    }

    /// Create a new adapter unavailable error.
    pub fn adapter_unavailable<S: Into<String>>(msg: S) -> Self {
        PilumError::AdapterUnavailable(msg.into())
    }

    /// Create a new invalid vector error.
    pub fn invalid_vector<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidVector(msg.into())
    }

    /// Create a new embedding error.
    pub fn embedding<S: Into<String>>(msg: S) -> Self {
        PilumError::Embedding(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidConfig(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        PilumError::Serialization(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        PilumError::Cancelled(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PilumError::Other(msg.into())
    }

    /// Whether fusion can continue without the component that raised this error.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            PilumError::AdapterTimeout(_)
                | PilumError::AdapterUnavailable(_)
                | PilumError::InvalidVector(_)
                | PilumError::Embedding(_)
        )
    }
}

impl From<tokio::task::JoinError> for PilumError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            PilumError::cancelled(err.to_string())
        } else {
            PilumError::other(format!("background task panicked: {err}"))
        }
    }
}
