//! Vedika Common Library
//!
//! Shared code for the Vedika gateway and indexer including:
//! - Record store over the static snapshot
//! - Embedding client abstraction
//! - Vector index build, persistence and hot swapping
//! - Retrieval, context assembly and answer generation
//! - The query pipeline tying them together
//! - Error types, configuration, metrics

pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod metrics;
pub mod pipeline;
pub mod records;
pub mod retrieval;
mod retry;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::{Corpus, CorpusHandle, IndexMaintainer, VectorIndex};
pub use pipeline::{ChatQuery, ChatResponse, QueryPipeline};
pub use records::{Record, RecordId, RecordStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model (local hashing embedder)
pub const DEFAULT_EMBEDDING_MODEL: &str = "vedika-hash-v1";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Default generation model (OpenRouter)
pub const DEFAULT_GENERATION_MODEL: &str = "qwen/qwen3-30b-a3b:free";
