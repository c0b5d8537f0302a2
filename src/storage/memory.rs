//! In-memory storage implementation for tests and ephemeral indexes.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::traits::{Storage, StorageError, StorageInput, StorageOutput};

type FileMap = Arc<Mutex<HashMap<String, Arc<[u8]>>>>;

/// An in-memory storage implementation.
///
/// Clones share the same files, so a test can hold one handle while the
/// index persists through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: FileMap,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Raw contents of a file, if present.
    pub fn read_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|data| data.to_vec())
    }

    /// Replace a file's contents directly.
    pub fn write_bytes(&self, name: &str, data: impl Into<Vec<u8>>) {
        let data: Vec<u8> = data.into();
        self.files.lock().insert(name.to_string(), data.into());
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(Box::new(MemoryInput {
            size: data.len() as u64,
            cursor: Cursor::new(Arc::clone(data)),
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.files
            .lock()
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()).into())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// A memory-based input implementation.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
    size: u64,
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> u64 {
        self.size
    }
}

/// A memory-based output. The file becomes visible on `close` or drop.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            let data: Arc<[u8]> = std::mem::take(&mut self.buffer).into();
            self.files.lock().insert(self.name.clone(), data);
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();

        let mut output = storage.create_output("test.bin").unwrap();
        output.write_all(b"Hello, World!").unwrap();
        assert!(!storage.file_exists("test.bin"));
        output.close().unwrap();

        assert!(storage.file_exists("test.bin"));
        assert_eq!(storage.file_size("test.bin").unwrap(), 13);

        let mut input = storage.open_input("test.bin").unwrap();
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"Hello, World!");
    }

    #[test]
    fn test_drop_commits_output() {
        let storage = MemoryStorage::new();
        {
            let mut output = storage.create_output("dropped").unwrap();
            output.write_all(b"abc").unwrap();
        }
        assert_eq!(storage.read_bytes("dropped"), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_clones_share_files() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.write_bytes("a", b"1".to_vec());
        other.rename_file("a", "b").unwrap();

        assert!(!storage.file_exists("a"));
        assert!(storage.file_exists("b"));
        assert_eq!(storage.file_count(), 1);
        assert!(storage.rename_file("a", "c").is_err());
    }
}
