//! Fragment index: storage and similarity search
//!
//! Three seams, all object safe so backends can be swapped at startup:
//! - `FragmentStore`: read side used by the retrieval engine
//! - `FragmentWriter`: write side used by ingestion
//! - `SimilarityProvider`: nearest-neighbour search over embeddings
//!
//! Backends:
//! - `MemoryIndex`: brute-force cosine over an in-process map, persisted as JSON lines
//! - `PgVectorIndex`: Postgres + pgvector through SeaORM raw statements

mod memory;
mod pgvector;

pub use memory::MemoryIndex;
pub use pgvector::PgVectorIndex;

use crate::config::{AppConfig, IndexBackend};
use crate::db::DbPool;
use crate::errors::Result;
use crate::models::{Fragment, FragmentId, IndexedFragment};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Restricts candidates to fragments of the listed sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilter {
    pub source_ids: Vec<String>,
}

impl SourceFilter {
    pub fn new<I, S>(source_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_ids: source_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.source_ids.iter().any(|s| s == source_id)
    }
}

/// Fragment id with its raw similarity (higher is more similar)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: FragmentId,
    pub score: f32,
}

/// Read access to indexed fragments
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// Fetch fragments by id; ids with no fragment are skipped
    async fn get_by_ids(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>>;

    /// Ids of every fragment matching the filter
    async fn filter_candidates(&self, filter: &SourceFilter) -> Result<HashSet<FragmentId>>;
}

/// Write access used at ingestion time
#[async_trait]
pub trait FragmentWriter: Send + Sync {
    /// Insert or replace fragments by id; returns how many were written
    async fn upsert(&self, batch: Vec<IndexedFragment>) -> Result<usize>;

    /// Remove every fragment of a source; returns how many were removed
    async fn clear_source(&self, source_id: &str) -> Result<usize>;

    /// Swap a source's fragments for `batch` in one step; returns
    /// `(removed, written)`. A rejected batch leaves the index untouched.
    async fn replace_source(&self, source_id: &str, batch: Vec<IndexedFragment>) -> Result<(usize, usize)>;

    /// Total number of indexed fragments
    async fn count(&self) -> Result<usize>;
}

/// Nearest-neighbour search over fragment embeddings
///
/// Implementations rank but never rerank: the engine owns boosting.
#[async_trait]
pub trait SimilarityProvider: Send + Sync {
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> Result<Vec<ScoredId>>;
}

/// The three seams of one opened backend
#[derive(Clone)]
pub struct IndexHandle {
    pub store: Arc<dyn FragmentStore>,
    pub provider: Arc<dyn SimilarityProvider>,
    pub writer: Arc<dyn FragmentWriter>,
    /// Set for the memory backend so callers can snapshot it
    pub memory: Option<Arc<MemoryIndex>>,
    /// Set for the pgvector backend so callers can ping it
    pub db: Option<DbPool>,
}

impl IndexHandle {
    fn from_memory(index: Arc<MemoryIndex>) -> Self {
        Self {
            store: index.clone(),
            provider: index.clone(),
            writer: index.clone(),
            memory: Some(index),
            db: None,
        }
    }

    /// Open the backend selected by `index.backend`
    ///
    /// A missing memory snapshot yields an empty index when `allow_empty`
    /// is set (ingestion builds one from scratch), an error otherwise.
    pub async fn open(config: &AppConfig, allow_empty: bool) -> Result<Self> {
        match config.index.backend {
            IndexBackend::Memory => {
                let path = &config.index.snapshot_path;
                let index = match MemoryIndex::load_snapshot(path).await {
                    Ok(index) => index,
                    Err(e) if allow_empty => {
                        warn!(path = %path, error = %e, "Starting with an empty in-memory index");
                        MemoryIndex::new()
                    }
                    Err(e) => return Err(e),
                };
                info!(path = %path, fragments = index.len().await, "In-memory index ready");
                Ok(Self::from_memory(Arc::new(index)))
            }
            IndexBackend::Pgvector => {
                let pool = DbPool::new(&config.database).await?;
                let index = Arc::new(PgVectorIndex::new(pool.clone()));
                index.ensure_schema(config.embedding.dimension).await?;
                info!("pgvector index ready");
                Ok(Self {
                    store: index.clone(),
                    provider: index.clone(),
                    writer: index,
                    memory: None,
                    db: Some(pool),
                })
            }
        }
    }
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_source_filter_contains() {
        let filter = SourceFilter::new(["abofol", "amistar"]);
        assert!(filter.contains("abofol"));
        assert!(!filter.contains("acelepryn"));
    }

    #[tokio::test]
    async fn test_open_memory_without_snapshot() {
        let mut config = AppConfig::default();
        config.index.snapshot_path = "/nonexistent/sdsforge/fragments.jsonl".into();

        assert!(IndexHandle::open(&config, false).await.is_err());

        let handle = IndexHandle::open(&config, true).await.unwrap();
        assert_eq!(handle.writer.count().await.unwrap(), 0);
        assert!(handle.memory.is_some());
    }
}
