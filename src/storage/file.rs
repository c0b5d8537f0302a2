//! File-based storage implementation.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::traits::{Storage, StorageError, StorageInput, StorageOutput};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Storage rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
    buffer_size: usize,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();

        if !directory.exists() {
            std::fs::create_dir_all(&directory).map_err(|e| {
                StorageError::InvalidLocation(format!("{}: {e}", directory.display()))
            })?;
        }

        if !directory.is_dir() {
            return Err(StorageError::InvalidLocation(format!(
                "{} is not a directory",
                directory.display()
            ))
            .into());
        }

        Ok(FileStorage {
            directory,
            buffer_size: DEFAULT_BUFFER_SIZE,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let file = File::open(self.file_path(name)).map_err(|e| StorageError::from_io(name, e))?;
        let size = file
            .metadata()
            .map_err(|e| StorageError::from_io(name, e))?
            .len();

        Ok(Box::new(FileInput {
            reader: BufReader::with_capacity(self.buffer_size, file),
            size,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.file_path(name))
            .map_err(|e| StorageError::from_io(name, e))?;

        Ok(Box::new(FileOutput {
            writer: BufWriter::with_capacity(self.buffer_size, file),
            position: 0,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.file_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(name, e).into()),
        }
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        std::fs::rename(self.file_path(old_name), self.file_path(new_name))
            .map_err(|e| StorageError::from_io(old_name, e))?;
        Ok(())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let metadata = self
            .file_path(name)
            .metadata()
            .map_err(|e| StorageError::from_io(name, e))?;
        Ok(metadata.len())
    }

    fn sync(&self) -> Result<()> {
        // Persist directory entries so a completed rename survives a crash.
        #[cfg(unix)]
        {
            File::open(&self.directory)
                .and_then(|dir| dir.sync_all())
                .map_err(|e| StorageError::IoError(e.to_string()))?;
        }
        Ok(())
    }
}

/// A file input implementation.
#[derive(Debug)]
pub struct FileInput {
    reader: BufReader<File>,
    size: u64,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> u64 {
        self.size
    }
}

/// A file output implementation.
#[derive(Debug)]
pub struct FileOutput {
    writer: BufWriter<File>,
    position: u64,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| StorageError::IoError(format!("Failed to flush: {e}")))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| StorageError::IoError(format!("Failed to sync: {e}")))?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn close(&mut self) -> Result<()> {
        self.flush_and_sync()
    }
}
