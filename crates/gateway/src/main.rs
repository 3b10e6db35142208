//! sdsforge API gateway
//!
//! Serves retrieval and question answering over the fragment index:
//! - `GET  /healthz`, `GET /ready`
//! - `POST /v1/retrieve`: tiered retrieval with diagnostics
//! - `POST /v1/query`: answer plus cited sources
//! - `POST /v1/answer`: plain-text answer

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use sdsforge_common::{
    cache::{Cache, CacheConfig},
    config::AppConfig,
    context::{create_generator, Generator},
    embeddings::create_embedder,
    index::IndexHandle,
    metrics,
};
use sdsforge_search::RetrievalEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Maximum concurrent requests (backpressure control)
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<RetrievalEngine>,
    pub generator: Arc<dyn Generator>,
    pub index: IndexHandle,
    /// Embedding cache, when Redis is configured and reachable
    pub cache: Option<Arc<Cache>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);
    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    let config = Arc::new(config);

    info!("Starting sdsforge gateway v{}", sdsforge_common::VERSION);

    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        metrics::register_metrics();
        info!(addr = %metrics_addr, "Prometheus exporter listening");
    }

    let cache = match CacheConfig::from_app(&config.redis) {
        Some(cache_config) => match Cache::new(cache_config).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, embedding cache disabled");
                None
            }
        },
        None => None,
    };

    let embedder = create_embedder(&config.embedding, cache.clone())?;
    let index = IndexHandle::open(&config, false).await?;
    let engine = RetrievalEngine::from_config(&config, embedder, &index)?;
    let generator = create_generator(&config.generation)?;

    let state = AppState {
        config: config.clone(),
        engine: Arc::new(engine),
        generator,
        index,
        cache,
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
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

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();
    let timeout = TimeoutLayer::new(Duration::from_secs(state.config.server.request_timeout_secs));

    let api_routes = Router::new()
        .route("/retrieve", post(handlers::search::retrieve))
        .route("/query", post(handlers::search::query))
        .route("/answer", post(handlers::search::answer));

    Router::new()
        .route("/healthz", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(timeout)
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use sdsforge_common::context::ExtractiveGenerator;
    use sdsforge_common::embeddings::{Embedder, HashEmbedder};
    use sdsforge_common::index::{FragmentWriter, MemoryIndex};
    use sdsforge_common::models::{Fragment, IndexedFragment};

    /// Router over an in-memory index holding `docs` (source, page, text)
    pub(crate) async fn router_with(docs: &[(&str, u32, &str)]) -> Router {
        let mut config = AppConfig::default();
        config.embedding.dimension = 256;

        let embedder = Arc::new(HashEmbedder::new(config.embedding.dimension));
        let memory = Arc::new(MemoryIndex::new());
        let mut batch = Vec::new();
        for (i, (source, page, text)) in docs.iter().enumerate() {
            batch.push(IndexedFragment {
                fragment: Fragment::new(*source, *page, i * 100, *text),
                embedding: embedder.embed(text).await.unwrap(),
            });
        }
        memory.upsert(batch).await.unwrap();

        let index = IndexHandle {
            store: memory.clone(),
            provider: memory.clone(),
            writer: memory.clone(),
            memory: Some(memory),
            db: None,
        };
        let engine = RetrievalEngine::from_config(&config, embedder, &index).unwrap();

        create_router(AppState {
            config: Arc::new(config),
            engine: Arc::new(engine),
            generator: Arc::new(ExtractiveGenerator::default()),
            index,
            cache: None,
        })
    }
}
