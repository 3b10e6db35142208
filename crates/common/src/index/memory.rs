//! In-process fragment index
//!
//! Brute-force cosine search is plenty for a few thousand safety-sheet
//! fragments. The snapshot format is one `IndexedFragment` JSON object per
//! line, written in id order so snapshots diff cleanly.

use super::{cosine_similarity, FragmentStore, FragmentWriter, ScoredId, SimilarityProvider, SourceFilter};
use crate::errors::{AppError, Result};
use crate::models::{rank_order, Fragment, FragmentId, IndexedFragment};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<FragmentId, IndexedFragment>,
    dimension: Option<usize>,
}

/// Cosine index held entirely in memory
#[derive(Default)]
pub struct MemoryIndex {
    state: RwLock<MemoryState>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed fragments
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Load a JSON-lines snapshot
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::IndexNotFound {
                    path: path.display().to_string(),
                }
            } else {
                AppError::from(e)
            }
        })?;

        let mut entries = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: IndexedFragment = serde_json::from_str(line).map_err(|e| AppError::Internal {
                message: format!("{}:{}: invalid snapshot entry: {}", path.display(), line_no + 1, e),
            })?;
            entries.push(entry);
        }

        let index = Self::new();
        index.upsert(entries).await?;
        info!(path = %path.display(), fragments = index.len().await, "Loaded index snapshot");
        Ok(index)
    }

    /// Write the snapshot atomically (temp file + rename)
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut out = String::new();
        {
            let state = self.state.read().await;
            for entry in state.entries.values() {
                out.push_str(&serde_json::to_string(entry)?);
                out.push('\n');
            }
        }

        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, out).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!(path = %path.display(), "Saved index snapshot");
        Ok(())
    }
}

#[async_trait]
impl FragmentStore for MemoryIndex {
    async fn get_by_ids(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.entries.get(id).map(|e| e.fragment.clone()))
            .collect())
    }

    async fn filter_candidates(&self, filter: &SourceFilter) -> Result<HashSet<FragmentId>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|e| filter.contains(&e.fragment.source_id))
            .map(|e| e.fragment.id.clone())
            .collect())
    }
}

/// Dimension the index has after accepting `batch`; every entry must agree
fn batch_dimension(mut expected: Option<usize>, batch: &[IndexedFragment]) -> Result<Option<usize>> {
    for entry in batch {
        let dim = entry.embedding.len();
        match expected {
            Some(expected) if expected != dim => {
                return Err(AppError::Validation {
                    message: format!(
                        "embedding dimension {} does not match index dimension {}",
                        dim, expected
                    ),
                    field: Some("embedding".to_string()),
                });
            }
            Some(_) => {}
            None => expected = Some(dim),
        }
    }
    Ok(expected)
}

#[async_trait]
impl FragmentWriter for MemoryIndex {
    async fn upsert(&self, batch: Vec<IndexedFragment>) -> Result<usize> {
        let mut state = self.state.write().await;
        state.dimension = batch_dimension(state.dimension, &batch)?;

        let written = batch.len();
        for entry in batch {
            state.entries.insert(entry.fragment.id.clone(), entry);
        }
        debug!(written, total = state.entries.len(), "Upserted fragments");
        Ok(written)
    }

    async fn replace_source(&self, source_id: &str, batch: Vec<IndexedFragment>) -> Result<(usize, usize)> {
        let mut state = self.state.write().await;

        // Replacing the only source frees the dimension
        let sole_source = state.entries.values().all(|e| e.fragment.source_id == source_id);
        let current = if sole_source { None } else { state.dimension };
        let dimension = batch_dimension(current, &batch)?;

        let before = state.entries.len();
        state.entries.retain(|_, e| e.fragment.source_id != source_id);
        let removed = before - state.entries.len();

        let written = batch.len();
        for entry in batch {
            state.entries.insert(entry.fragment.id.clone(), entry);
        }
        state.dimension = dimension;
        debug!(source_id, removed, written, "Replaced source fragments");
        Ok((removed, written))
    }

    async fn clear_source(&self, source_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|_, e| e.fragment.source_id != source_id);
        if state.entries.is_empty() {
            state.dimension = None;
        }
        Ok(before - state.entries.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len().await)
    }
}

#[async_trait]
impl SimilarityProvider for MemoryIndex {
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> Result<Vec<ScoredId>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        if let Some(dim) = state.dimension {
            if dim != query.len() {
                return Err(AppError::ProviderUnavailable {
                    message: format!("query dimension {} does not match index dimension {}", query.len(), dim),
                });
            }
        }

        let mut scored: Vec<(f32, &Fragment)> = state
            .entries
            .values()
            .filter(|e| filter.map_or(true, |f| f.contains(&e.fragment.source_id)))
            .map(|e| (cosine_similarity(query, &e.embedding), &e.fragment))
            .collect();

        scored.sort_by(|a, b| rank_order(a.0, a.1, b.0, b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, fragment)| ScoredId {
                id: fragment.id.clone(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, page: u32, offset: usize, embedding: Vec<f32>) -> IndexedFragment {
        IndexedFragment {
            fragment: Fragment::new(source, page, offset, format!("{} p{} @{}", source, page, offset)),
            embedding,
        }
    }

    async fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new();
        index
            .upsert(vec![
                entry("abofol", 1, 0, vec![1.0, 0.0]),
                entry("abofol", 1, 100, vec![0.8, 0.6]),
                entry("amistar", 2, 0, vec![0.0, 1.0]),
                entry("amistar", 1, 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_search_orders_by_score_then_provenance() {
        let index = seeded().await;
        let hits = index.search(&[1.0, 0.0], 3, None).await.unwrap();
        let expected_first = FragmentId::derive("abofol", 1, 0);
        let expected_second = FragmentId::derive("amistar", 1, 0);
        assert_eq!(hits[0].id, expected_first);
        assert_eq!(hits[1].id, expected_second);
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_search_respects_filter() {
        let index = seeded().await;
        let filter = SourceFilter::new(["amistar"]);
        let hits = index.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 2);

        let candidates = index.filter_candidates(&filter).await.unwrap();
        assert!(hits.iter().all(|h| candidates.contains(&h.id)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = seeded().await;
        assert!(index.search(&[1.0, 0.0, 0.0], 3, None).await.is_err());
        assert!(index.upsert(vec![entry("x", 1, 0, vec![1.0])]).await.is_err());
    }

    #[tokio::test]
    async fn test_get_by_ids_skips_missing() {
        let index = seeded().await;
        let ids = vec![FragmentId::derive("abofol", 1, 0), FragmentId::from("deadbeef")];
        let fragments = index.get_by_ids(&ids).await.unwrap();
        assert_eq!(fragments.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_source_and_reupsert() {
        let index = seeded().await;
        assert_eq!(index.clear_source("abofol").await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 2);
        index.upsert(vec![entry("amistar", 1, 0, vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_batch_writes_nothing() {
        let index = seeded().await;
        let batch = vec![entry("nuevo", 1, 0, vec![1.0, 0.0]), entry("nuevo", 1, 100, vec![1.0])];
        assert!(index.upsert(batch.clone()).await.is_err());
        assert_eq!(index.count().await.unwrap(), 4);

        let mut replacement = batch;
        replacement[0].fragment = Fragment::new("abofol", 9, 0, "nuevo texto");
        replacement[1].fragment = Fragment::new("abofol", 9, 100, "otro texto");
        assert!(index.replace_source("abofol", replacement).await.is_err());
        assert_eq!(index.count().await.unwrap(), 4);
        let abofol = index.filter_candidates(&SourceFilter::new(["abofol"])).await.unwrap();
        assert!(abofol.contains(&FragmentId::derive("abofol", 1, 100)));
    }

    #[tokio::test]
    async fn test_replace_source_swaps_fragments() {
        let index = seeded().await;
        let (removed, written) = index
            .replace_source("abofol", vec![entry("abofol", 7, 0, vec![0.6, 0.8])])
            .await
            .unwrap();
        assert_eq!((removed, written), (2, 1));
        assert_eq!(index.count().await.unwrap(), 3);

        let abofol = index.filter_candidates(&SourceFilter::new(["abofol"])).await.unwrap();
        assert_eq!(abofol.len(), 1);
        assert!(abofol.contains(&FragmentId::derive("abofol", 7, 0)));
    }

    #[tokio::test]
    async fn test_replacing_sole_source_may_change_dimension() {
        let index = MemoryIndex::new();
        index.upsert(vec![entry("abofol", 1, 0, vec![1.0, 0.0])]).await.unwrap();
        index
            .replace_source("abofol", vec![entry("abofol", 1, 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 1, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let index = seeded().await;
        let path = std::env::temp_dir().join(format!("sdsforge-snapshot-{}.jsonl", std::process::id()));
        index.save_snapshot(&path).await.unwrap();

        let loaded = MemoryIndex::load_snapshot(&path).await.unwrap();
        assert_eq!(loaded.len().await, 4);
        let a = index.search(&[0.6, 0.8], 4, None).await.unwrap();
        let b = loaded.search(&[0.6, 0.8], 4, None).await.unwrap();
        assert_eq!(a, b);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_index_not_found() {
        let err = MemoryIndex::load_snapshot("/nonexistent/fragments.jsonl").await.err().unwrap();
        assert!(matches!(err, AppError::IndexNotFound { .. }));
    }
}
