//! Semantic retrieval through an external vector search service.
//!
//! # Module Structure
//!
//! - `adapter`: the [`VectorSearch`] contract a service implements
//! - `embedder`: the [`Embedder`] collaborator and a hashing implementation
//! - `memory`: an exact in-memory [`VectorSearch`]
//! - `similarity`: validation and cosine helpers

pub mod adapter;
pub mod embedder;
pub mod memory;
pub mod similarity;

pub use adapter::{VectorMatch, VectorSearch};
pub use embedder::{Embedder, HashEmbedder};
pub use memory::InMemoryVectorIndex;
