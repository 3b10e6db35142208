//! sdsforge ingestion CLI
//!
//! Usage: `ingestion [SOURCE_DIR]`
//!
//! 1. Extracts every PDF in the source directory page by page
//! 2. Chunks, embeds and indexes the pages
//! 3. Saves the snapshot when the in-memory backend is selected

use anyhow::Context;
use sdsforge_common::cache::{Cache, CacheConfig};
use sdsforge_common::embeddings::create_embedder;
use sdsforge_common::index::IndexHandle;
use sdsforge_common::{config::AppConfig, VERSION};
use sdsforge_ingestion::{ChunkingConfig, IngestionProcessor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate()?;
    init_tracing(&config);

    info!("Starting sdsforge ingestion v{}", VERSION);

    let cache = match CacheConfig::from_app(&config.redis) {
        Some(cache_config) => match Cache::new(cache_config).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, embedding without cache");
                None
            }
        },
        None => None,
    };

    let embedder = create_embedder(&config.embedding, cache)?;
    let index = IndexHandle::open(&config, true).await?;
    let chunking = ChunkingConfig::from_settings(&config.chunking)?;
    let processor = IngestionProcessor::new(
        embedder,
        index.writer.clone(),
        chunking,
        config.embedding.batch_size,
    );

    let source_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&config.index.source_dir));

    let report = processor.process_directory(&source_dir).await?;

    if let Some(memory) = &index.memory {
        memory.save_snapshot(&config.index.snapshot_path).await?;
        info!(path = %config.index.snapshot_path, "Index snapshot saved");
    }

    info!(
        sources = report.sources.len(),
        failed = report.failed.len(),
        fragments = report.total_fragments(),
        "Ingestion complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}
