//! Storage abstraction layer for Pilum.
//!
//! Snapshots of the sparse index are written through the [`Storage`] trait,
//! so the same persistence code runs against a directory on disk or an
//! in-memory map in tests.
//!
//! # Example
//!
//! ```
//! use std::io::{Read, Write};
//! use pilum::storage::{MemoryStorage, Storage};
//!
//! # fn main() -> pilum::error::Result<()> {
//! let storage = MemoryStorage::new();
//! let mut output = storage.create_output("notes.txt")?;
//! output.write_all(b"hello")?;
//! output.close()?;
//!
//! let mut text = String::new();
//! storage.open_input("notes.txt")?.read_to_string(&mut text)?;
//! assert_eq!(text, "hello");
//! # Ok(())
//! # }
//! ```

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use traits::{Storage, StorageError, StorageInput, StorageOutput};
