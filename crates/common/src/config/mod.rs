//! Configuration management for sdsforge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values
//!
//! The loaded `AppConfig` is immutable and handed to constructors; nothing
//! downstream reads the environment on its own.

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Postgres configuration (pgvector backend only)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis configuration (embedding cache)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Fragment index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Chunking parameters used at ingestion time
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval heuristics
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Entity aliases and keyword groups
    #[serde(default)]
    pub lexicon: LexiconConfig,

    /// Answer generation backend
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; caching is disabled when unset
    pub url: Option<String>,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hash
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Which index backend holds fragments and vectors
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// In-process index persisted as a JSON-lines snapshot
    #[default]
    Memory,
    /// Postgres with the pgvector extension
    Pgvector,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,

    /// Snapshot file for the memory backend
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    /// Directory scanned for PDFs by the ingestion binary
    #[serde(default = "default_source_dir")]
    pub source_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Window size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive windows in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Results returned when the caller gives no top_k
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Minimum normalized Levenshtein similarity for an entity match
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f32,

    /// Query tokens shorter than this never match an entity
    #[serde(default = "default_min_token_chars")]
    pub min_token_chars: usize,

    /// Additive bonus per matched keyword group
    #[serde(default = "default_keyword_boost")]
    pub keyword_boost: f32,

    /// Upper bound on the summed keyword bonus
    #[serde(default = "default_boost_cap")]
    pub boost_cap: f32,

    /// Neighbours requested per slot, so boosts can reorder a wider pool
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EntityAliasConfig {
    /// Canonical entity name
    pub name: String,

    /// Known surface forms
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Source ids holding this entity's fragments (defaults to the name)
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct KeywordGroupConfig {
    /// Group name used as boost tag
    pub name: String,

    /// Vocabulary of the group
    pub terms: Vec<String>,

    /// Per-group bonus, overrides `retrieval.keyword_boost`
    #[serde(default)]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LexiconConfig {
    #[serde(default)]
    pub entities: Vec<EntityAliasConfig>,

    #[serde(default)]
    pub keyword_groups: Vec<KeywordGroupConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Backend: extractive, openai, xai, groq, ollama
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// Model name (backend specific)
    pub model: Option<String>,

    /// API key for hosted backends
    pub api_key: Option<String>,

    /// Base URL override
    pub base_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Maximum fragments placed in the prompt
    #[serde(default = "default_max_context")]
    pub max_context: usize,

    /// Lines containing any of these markers are dropped from answers
    #[serde(default = "default_metadata_markers")]
    pub metadata_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 60 }
fn default_database_url() -> String { "postgres://localhost/sdsforge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_ttl() -> u64 { 86_400 }
fn default_redis_prefix() -> String { "sdsforge".to_string() }
fn default_embedding_provider() -> String { "hash".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_snapshot_path() -> String { "data/index/fragments.jsonl".to_string() }
fn default_source_dir() -> String { "data/raw".to_string() }
fn default_chunk_size() -> usize { 2000 }
fn default_chunk_overlap() -> usize { 200 }
fn default_top_k() -> usize { 6 }
fn default_fuzzy_threshold() -> f32 { 0.8 }
fn default_min_token_chars() -> usize { 3 }
fn default_keyword_boost() -> f32 { 0.15 }
fn default_boost_cap() -> f32 { 0.30 }
fn default_candidate_multiplier() -> usize { 3 }
fn default_generation_provider() -> String { "extractive".to_string() }
fn default_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> usize { 700 }
fn default_generation_timeout() -> u64 { 60 }
fn default_max_context() -> usize { 6 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "sdsforge".to_string() }

fn default_metadata_markers() -> Vec<String> {
    [
        "page_label:",
        "file_path:",
        "FICHA DE DATOS DE SEGURIDAD",
        "según el Reglamento",
        "Fecha de revisión:",
        "Número SDS:",
        "Fecha de la última expedición:",
        "Fecha de la primera expedición:",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__DEFAULT_TOP_K=8
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject values the retrieval and chunking code cannot work with
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(AppError::config("chunking.chunk_size must be > 0"));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(AppError::config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }

        let retrieval = &self.retrieval;
        if !(retrieval.fuzzy_threshold > 0.0 && retrieval.fuzzy_threshold <= 1.0) {
            return Err(AppError::config(format!(
                "retrieval.fuzzy_threshold must be in (0, 1], got {}",
                retrieval.fuzzy_threshold
            )));
        }
        if retrieval.keyword_boost < 0.0 || retrieval.boost_cap < 0.0 {
            return Err(AppError::config("keyword boosts must not be negative"));
        }
        if retrieval.candidate_multiplier == 0 {
            return Err(AppError::config("retrieval.candidate_multiplier must be >= 1"));
        }

        for entity in &self.lexicon.entities {
            if entity.name.trim().is_empty() {
                return Err(AppError::config("lexicon entity with empty name"));
            }
        }
        for group in &self.lexicon.keyword_groups {
            if group.terms.iter().all(|t| t.trim().is_empty()) {
                return Err(AppError::config(format!(
                    "keyword group '{}' has no terms",
                    group.name
                )));
            }
            if group.boost.is_some_and(|b| b < 0.0) {
                return Err(AppError::config(format!(
                    "keyword group '{}' has a negative boost",
                    group.name
                )));
            }
        }

        if self.embedding.dimension == 0 {
            return Err(AppError::config("embedding.dimension must be > 0"));
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_ttl_secs: default_redis_ttl(),
            key_prefix: default_redis_prefix(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            snapshot_path: default_snapshot_path(),
            source_dir: default_source_dir(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            fuzzy_threshold: default_fuzzy_threshold(),
            min_token_chars: default_min_token_chars(),
            keyword_boost: default_keyword_boost(),
            boost_cap: default_boost_cap(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

impl Default for LexiconConfig {
    /// Products and safety-section vocabulary of the reference deployment
    fn default() -> Self {
        let entity = |name: &str, aliases: &[&str]| EntityAliasConfig {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            sources: Vec::new(),
        };
        let group = |name: &str, terms: &[&str]| KeywordGroupConfig {
            name: name.to_string(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            boost: None,
        };

        Self {
            entities: vec![
                entity("acelepryn", &["acelepryn"]),
                entity("amistar", &["amistar", "amistar xtra"]),
                entity("abofol", &["abofol", "abofoll", "abofol l"]),
            ],
            keyword_groups: vec![
                group("burns", &["quemadura"]),
                group("first_aid", &["primeros auxilios"]),
                group("fire", &["incendio", "extincion"]),
                group("skin", &["contacto con la piel", "piel"]),
                group("eyes", &["ojos", "ocular"]),
            ],
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            max_context: default_max_context(),
            metadata_markers: default_metadata_markers(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}
