//! Hybrid retrieval: keyword and semantic rankings fused into one answer.
//!
//! # Architecture
//!
//! - **Retrievers**: `retriever` - strategies that turn a query into a ranked list
//! - **Fusion**: `fusion` - reciprocal rank fusion over any number of lists
//! - **Cache**: `cache` - sharded TTL cache of fused answers
//! - **Engine**: `engine` - the query orchestrator and its write-side operations
//! - **Maintenance**: `maintenance` - periodic snapshots, rebuilds and cache sweeps
//! - **Types**: `types` - answers and their provenance
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pilum::config::PilumConfig;
//! use pilum::hybrid::HybridRetriever;
//! use pilum::vector::{HashEmbedder, InMemoryVectorIndex};
//!
//! # async fn example() -> pilum::error::Result<()> {
//! let config = PilumConfig::from_file("pilum.json")?;
//! let (retriever, _status) = HybridRetriever::open(&config)?;
//! let retriever = retriever.with_vector_search(
//!     Arc::new(HashEmbedder::new(384)),
//!     Arc::new(InMemoryVectorIndex::new(384)),
//! );
//! retriever.spawn_maintenance();
//!
//! let response = retriever.query("kubernetes networking", 5).await?;
//! for passage in &response.passages {
//!     println!("{} {:.4}", passage.chunk_id, passage.fused_score);
//! }
//!
//! retriever.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod engine;
pub mod fusion;
pub mod maintenance;
pub mod retriever;
pub mod types;

pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use engine::{EngineStats, HybridRetriever};
pub use fusion::{ContributingRank, FusedHit, FusionConfig, reciprocal_rank_fusion};
pub use maintenance::{MaintenanceHandle, MaintenanceSettings, MaintenanceStats};
pub use retriever::{KeywordRetriever, RetrievalRequest, Retriever, VectorRetriever};
pub use types::{
    CachedAnswer, Degradation, DegradationReason, Provenance, QueryResponse, RetrievalMode,
    RetrievedPassage,
};
