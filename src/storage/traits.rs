//! Storage abstraction trait and common types.

use std::io::{Read, Write};

use thiserror::Error;

use crate::error::Result;

/// A named-blob store that snapshots are written to and read from.
///
/// Backends only have to offer whole-file reads, truncating writes and an
/// atomic rename; the snapshot writer builds crash safety on top of those.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open a file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Rename a file, replacing `new_name` if it exists.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Sync all pending writes to storage.
    fn sync(&self) -> Result<()>;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> u64;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush and sync the output to storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Bytes written so far.
    fn position(&self) -> u64;

    /// Finish the file. Data is durable once this returns.
    fn close(&mut self) -> Result<()>;
}

/// Error types specific to storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Storage root is not usable.
    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl StorageError {
    /// Map an I/O error, keeping not-found distinguishable.
    pub(crate) fn from_io(name: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::FileNotFound(name.to_string())
        } else {
            StorageError::IoError(format!("{name}: {err}"))
        }
    }
}
