//! sdsforge Common Library
//!
//! Shared code for the sdsforge services including:
//! - Fragment and retrieval models
//! - Fragment index traits and backends (in-memory, pgvector)
//! - Embedding client abstraction
//! - Answer generation backends
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::{FragmentStore, FragmentWriter, SimilarityProvider};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
