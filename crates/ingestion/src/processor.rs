//! Ingestion processor
//!
//! Core loop: PDF pages -> chunks -> embeddings -> index. Re-ingesting a
//! source replaces its fragments; fragment ids are derived from
//! (source, page, offset) so an unchanged document yields the same ids.

use crate::chunker::{chunk_text, ChunkingConfig};
use crate::errors::IngestionError;
use crate::pdf::{extract_pages, PageText};
use sdsforge_common::embeddings::Embedder;
use sdsforge_common::index::FragmentWriter;
use sdsforge_common::metrics;
use sdsforge_common::models::{Fragment, IndexedFragment};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// Outcome for one ingested source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub pages: usize,
    pub fragments: usize,
}

/// Outcome of a directory run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub sources: Vec<SourceReport>,
    /// Files that could not be ingested
    pub failed: Vec<String>,
}

impl IngestionReport {
    pub fn total_fragments(&self) -> usize {
        self.sources.iter().map(|s| s.fragments).sum()
    }
}

/// Ingestion processor
pub struct IngestionProcessor {
    embedder: Arc<dyn Embedder>,
    writer: Arc<dyn FragmentWriter>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl IngestionProcessor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        writer: Arc<dyn FragmentWriter>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            writer,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    /// Source id of a document: its file stem
    pub fn source_id(path: &Path) -> Option<String> {
        path.file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Chunk, embed and index already extracted pages, replacing whatever
    /// the index held for the source
    #[instrument(skip(self, pages), fields(pages = pages.len()))]
    pub async fn process_pages(&self, source_id: &str, pages: &[PageText]) -> Result<usize, IngestionError> {
        let fragments: Vec<Fragment> = pages
            .iter()
            .flat_map(|page| {
                chunk_text(&page.text, &self.chunking)
                    .into_iter()
                    .map(move |chunk| Fragment::new(source_id, page.page, chunk.offset, chunk.content))
            })
            .collect();

        let mut indexed = Vec::with_capacity(fragments.len());
        for batch in fragments.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|f| f.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(IngestionError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }
            indexed.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(embeddings)
                    .map(|(fragment, embedding)| IndexedFragment { fragment, embedding }),
            );
            debug!(embedded = indexed.len(), total = fragments.len(), "Embedded batch");
        }

        let (removed, written) = self.writer.replace_source(source_id, indexed).await?;
        info!(removed, written, "Source indexed");
        Ok(written)
    }

    /// Ingest one PDF file
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn process_pdf(&self, path: &Path) -> Result<SourceReport, IngestionError> {
        let started = Instant::now();
        let source_id = Self::source_id(path)
            .ok_or_else(|| IngestionError::Config(format!("cannot derive a source id from {}", path.display())))?;

        let pages = extract_pages(path)?;
        let fragments = self.process_pages(&source_id, &pages).await?;

        metrics::record_ingestion(started.elapsed().as_secs_f64(), fragments, &source_id);
        Ok(SourceReport {
            source_id,
            pages: pages.len(),
            fragments,
        })
    }

    /// Ingest every `*.pdf` directly inside `dir`, in file name order
    ///
    /// A file that fails is logged and reported; the run continues.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn process_directory(&self, dir: &Path) -> Result<IngestionReport, IngestionError> {
        if !dir.is_dir() {
            return Err(IngestionError::FileNotFound(dir.display().to_string()));
        }
        info!("Processing directory of PDFs");

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_pdf = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false);
            if is_pdf && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut report = IngestionReport::default();
        for path in paths {
            match self.process_pdf(&path).await {
                Ok(source) => {
                    info!(
                        source_id = %source.source_id,
                        pages = source.pages,
                        fragments = source.fragments,
                        "PDF processed successfully"
                    );
                    report.sources.push(source);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to process PDF");
                    report.failed.push(path.display().to_string());
                }
            }
        }

        info!(
            sources = report.sources.len(),
            failed = report.failed.len(),
            fragments = report.total_fragments(),
            "Directory processing complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::tests::build_pdf;
    use async_trait::async_trait;
    use sdsforge_common::embeddings::HashEmbedder;
    use sdsforge_common::errors::{AppError, Result as AppResult};
    use sdsforge_common::index::{FragmentStore, MemoryIndex, SourceFilter};

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> AppResult<Vec<f32>> {
            Err(AppError::EmbeddingError { message: "offline".into() })
        }

        async fn embed_batch(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingError { message: "offline".into() })
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    fn processor(index: Arc<MemoryIndex>, chunking: ChunkingConfig) -> IngestionProcessor {
        IngestionProcessor::new(Arc::new(HashEmbedder::new(32)), index, chunking, 2)
    }

    fn page(page: u32, text: &str) -> PageText {
        PageText { page, text: text.to_string() }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sdsforge-ingestion-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_pages_become_fragments() {
        let index = Arc::new(MemoryIndex::new());
        let chunking = ChunkingConfig::new(40, 10).unwrap();
        let pages = vec![
            page(1, "Seccion 4. Primeros auxilios. En caso de contacto ocular lavar con agua."),
            page(3, "Seccion 5. Medidas de lucha contra incendios."),
        ];

        let written = processor(index.clone(), chunking).process_pages("abofol", &pages).await.unwrap();
        assert!(written >= 3);
        assert_eq!(index.len().await, written);

        let ids = index.filter_candidates(&SourceFilter::new(["abofol"])).await.unwrap();
        let ids: Vec<_> = ids.into_iter().collect();
        let fragments = index.get_by_ids(&ids).await.unwrap();
        assert!(fragments.iter().all(|f| f.source_id == "abofol"));
        assert!(fragments.iter().any(|f| f.page == 3 && f.offset_start == 0));
        assert!(fragments.iter().all(|f| !f.text.trim().is_empty()));
    }

    #[tokio::test]
    async fn test_reingest_replaces_source() {
        let index = Arc::new(MemoryIndex::new());
        let processor = processor(index.clone(), ChunkingConfig::new(20, 5).unwrap());

        processor
            .process_pages("amistar", &[page(1, "texto largo que ocupa varias ventanas de texto")])
            .await
            .unwrap();
        processor.process_pages("abofol", &[page(1, "otra ficha")]).await.unwrap();

        let written = processor.process_pages("amistar", &[page(2, "corto")]).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_index_untouched() {
        let index = Arc::new(MemoryIndex::new());
        processor(index.clone(), ChunkingConfig::default())
            .process_pages("abofol", &[page(1, "ficha original")])
            .await
            .unwrap();

        let failing = IngestionProcessor::new(Arc::new(FailingEmbedder), index.clone(), ChunkingConfig::default(), 4);
        let err = failing.process_pages("abofol", &[page(1, "ficha nueva")]).await.unwrap_err();
        assert!(matches!(err, IngestionError::App(AppError::EmbeddingError { .. })));
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_write_keeps_previous_fragments() {
        let index = Arc::new(MemoryIndex::new());
        let processor = processor(index.clone(), ChunkingConfig::default());
        processor.process_pages("abofol", &[page(1, "ficha original")]).await.unwrap();
        processor.process_pages("amistar", &[page(1, "otra ficha")]).await.unwrap();

        let narrower = IngestionProcessor::new(Arc::new(HashEmbedder::new(16)), index.clone(), ChunkingConfig::default(), 4);
        let err = narrower.process_pages("abofol", &[page(1, "ficha nueva")]).await.unwrap_err();
        assert!(matches!(err, IngestionError::App(AppError::Validation { .. })));

        let ids: Vec<_> = index
            .filter_candidates(&SourceFilter::new(["abofol"]))
            .await
            .unwrap()
            .into_iter()
            .collect();
        let fragments = index.get_by_ids(&ids).await.unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, "ficha original");
    }

    #[test]
    fn test_source_id_from_file_stem() {
        assert_eq!(IngestionProcessor::source_id(Path::new("data/raw/abofol.pdf")).as_deref(), Some("abofol"));
        assert_eq!(IngestionProcessor::source_id(Path::new("/")), None);
    }

    #[tokio::test]
    async fn test_process_directory() {
        let dir = scratch_dir("directory");
        build_pdf(&["Acelepryn ficha de datos de seguridad", "Primeros auxilios"])
            .save(dir.join("acelepryn.pdf"))
            .unwrap();
        build_pdf(&["Amistar Xtra incendio"]).save(dir.join("amistar.pdf")).unwrap();
        std::fs::write(dir.join("broken.pdf"), b"not a pdf").unwrap();
        std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let index = Arc::new(MemoryIndex::new());
        let report = processor(index.clone(), ChunkingConfig::default())
            .process_directory(&dir)
            .await
            .unwrap();

        let sources: Vec<_> = report.sources.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(sources, vec!["acelepryn", "amistar"]);
        assert_eq!(report.sources[0].pages, 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].ends_with("broken.pdf"));
        assert_eq!(index.len().await, report.total_fragments());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let index = Arc::new(MemoryIndex::new());
        let err = processor(index, ChunkingConfig::default())
            .process_directory(Path::new("/nonexistent/sdsforge/raw"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::FileNotFound(_)));
    }
}
