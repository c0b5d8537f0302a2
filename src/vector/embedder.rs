//! Text embedding collaborators.
//!
//! Query embeddings are produced outside the retrieval core; [`Embedder`] is
//! the seam. [`HashEmbedder`] is a deterministic, model-free implementation
//! for offline use and tests.

use async_trait::async_trait;

use crate::analysis::{SimpleTokenizer, Tokenizer};
use crate::error::{PilumError, Result};
use crate::vector::similarity::normalize;

pub const DEFAULT_HASH_DIMENSION: usize = 384;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Trait for converting text to vector embeddings.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use pilum::error::Result;
/// use pilum::vector::Embedder;
///
/// #[derive(Debug)]
/// struct Constant;
///
/// #[async_trait]
/// impl Embedder for Constant {
///     async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
///         Ok(vec![1.0, 0.0])
///     }
///
///     fn dimension(&self) -> usize {
///         2
///     }
/// }
/// ```
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of produced vectors.
    fn dimension(&self) -> usize;
}

/// 64-bit FNV-1a.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Feature-hashing embedder: every token adds ±1 to the bucket its FNV-1a
/// hash selects (the top bit picks the sign), then the vector is scaled to
/// unit length. Texts sharing tokens point in similar directions.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    tokenizer: SimpleTokenizer,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        HashEmbedder {
            dimension: dimension.max(1),
            tokenizer: SimpleTokenizer,
        }
    }

    /// Synchronous form of [`Embedder::embed`].
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenizer.tokenize(text);
        if tokens.is_empty() {
            return Err(PilumError::embedding("text has no embeddable tokens"));
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        if normalize(&mut vector) == 0.0 {
            return Err(PilumError::embedding("tokens hashed to a zero vector"));
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
