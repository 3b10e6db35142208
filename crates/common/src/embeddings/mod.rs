//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible HTTP endpoints (text-embedding-3-small and friends)
//! - A deterministic hashing embedder that needs no network
//! - A Redis-backed cache wrapping either of the above

use crate::cache::{keys, Cache};
use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
    batch_size: usize,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
        })
    }

    /// Make request with exponential backoff
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let mut attempt = 0u32;
        retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                match self.make_request(texts).await {
                    Ok(embeddings) => Ok(embeddings),
                    Err(backoff::Error::Transient { err, .. }) if current <= self.max_retries => {
                        tracing::warn!(
                            attempt = current,
                            max_retries = self.max_retries,
                            error = %err,
                            "Embedding request failed, retrying"
                        );
                        Err(backoff::Error::transient(err))
                    }
                    Err(backoff::Error::Transient { err, .. }) => Err(backoff::Error::permanent(err)),
                    Err(permanent) => Err(permanent),
                }
            }
        })
        .await
    }

    async fn make_request(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, backoff::Error<AppError>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: texts,
            model: &self.model,
            dimensions: self.model.starts_with("text-embedding-3").then_some(self.dimension),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                backoff::Error::transient(AppError::EmbeddingError {
                    message: format!("Request failed: {}", e),
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            };
            // Client errors other than throttling will not improve on retry
            return if status.is_client_error() && status.as_u16() != 429 {
                Err(backoff::Error::permanent(err))
            } else {
                Err(backoff::Error::transient(err))
            };
        }

        let mut result: OpenAIResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })
        })?;

        if result.data.len() != texts.len() {
            return Err(backoff::Error::permanent(AppError::EmbeddingError {
                message: format!("Expected {} embeddings, got {}", texts.len(), result.data.len()),
            }));
        }

        result.data.sort_by_key(|e| e.index);
        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::EmbeddingError {
            message: "Empty response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let start = Instant::now();
            let outcome = self.request_with_retry(chunk).await;
            metrics::record_embedding(
                start.elapsed().as_secs_f64(),
                &self.model,
                chunk.len(),
                outcome.is_ok(),
            );
            all_embeddings.extend(outcome?);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic bag-of-tokens embedder
///
/// Every lowercase alphanumeric token seeds a `StdRng` from its SHA-256
/// digest and contributes a fixed pseudo-random direction. The sum is
/// normalized to unit length, so texts sharing tokens have positive cosine
/// similarity and identical texts always embed identically.
pub struct HashEmbedder {
    dimension: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: format!("hash-{}", dimension),
        }
    }

    fn token_direction(&self, token: &str) -> Vec<f32> {
        let digest = Sha256::digest(token.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut rng = StdRng::from_seed(seed);
        (0..self.dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut acc = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            for (slot, v) in acc.iter_mut().zip(self.token_direction(token)) {
                *slot += v;
            }
        }

        let norm = acc.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            acc.iter_mut().for_each(|v| *v /= norm);
        }
        acc
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder that memoizes vectors in Redis
///
/// Cache failures are logged and the inner embedder is called directly.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<Cache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<Cache>) -> Self {
        Self { inner, cache }
    }

    async fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        match self.cache.get::<Vec<f32>>(key).await {
            Ok(hit) => {
                metrics::record_cache(hit.is_some(), "embedding");
                hit
            }
            Err(e) => {
                tracing::warn!(error = %e, "Embedding cache read failed, bypassing cache");
                None
            }
        }
    }

    async fn store(&self, key: &str, embedding: &Vec<f32>) {
        if let Err(e) = self.cache.set(key, embedding).await {
            tracing::warn!(error = %e, "Failed to cache embedding, continuing without cache");
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = keys::embedding(self.inner.model_name(), text);
        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }

        let embedding = self.inner.embed(text).await?;
        self.store(&key, &embedding).await;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut slots: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = keys::embedding(self.inner.model_name(), text);
            let hit = self.lookup(&key).await;
            if hit.is_none() {
                misses.push(i);
            }
            slots.push(hit);
        }

        if !misses.is_empty() {
            let pending: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&pending).await?;
            for (&i, embedding) in misses.iter().zip(fresh) {
                let key = keys::embedding(self.inner.model_name(), &texts[i]);
                self.store(&key, &embedding).await;
                slots[i] = Some(embedding);
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| AppError::EmbeddingError {
                    message: "Embedding provider returned fewer vectors than requested".to_string(),
                })
            })
            .collect()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Create an embedder based on configuration
///
/// When a cache is supplied the embedder is wrapped in a `CachedEmbedder`.
pub fn create_embedder(config: &EmbeddingConfig, cache: Option<Arc<Cache>>) -> Result<Arc<dyn Embedder>> {
    let base: Arc<dyn Embedder> = match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| {
                AppError::config("embedding.api_key is required for the openai provider")
            })?;
            Arc::new(OpenAIEmbedder::new(key, config)?)
        }
        "hash" => Arc::new(HashEmbedder::new(config.dimension)),
        other => {
            return Err(AppError::config(format!("Unknown embedding provider '{}'", other)));
        }
    };

    Ok(match cache {
        Some(cache) => Arc::new(CachedEmbedder::new(base, cache)),
        None => base,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_unit_length() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Primeros auxilios en caso de quemadura").await.unwrap();
        let b = embedder.embed("Primeros auxilios en caso de quemadura").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_hash_embedder_shared_tokens_are_closer() {
        let embedder = HashEmbedder::new(128);
        let query = embedder.embed("contacto con los ojos").await.unwrap();
        let related = embedder.embed("en caso de contacto con los ojos lavar").await.unwrap();
        let unrelated = embedder.embed("almacenar en lugar fresco y seco").await.unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_hash_embedder_empty_text() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_hash_batch_matches_single() {
        let embedder = HashEmbedder::new(32);
        let texts = vec!["ojos".to_string(), "piel".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[1], embedder.embed("piel").await.unwrap());
    }

    #[test]
    fn test_create_embedder_requires_openai_key() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            ..Default::default()
        };
        assert!(create_embedder(&config, None).is_err());

        let config = EmbeddingConfig {
            provider: "word2vec".into(),
            ..Default::default()
        };
        assert!(create_embedder(&config, None).is_err());
    }

    #[test]
    fn test_openai_request_shape() {
        let input = vec!["hola".to_string()];
        let request = OpenAIRequest {
            input: &input,
            model: "text-embedding-3-small",
            dimensions: Some(384),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["dimensions"], 384);
        assert_eq!(json["input"][0], "hola");
    }
    proptest! {
        #[test]
        fn hash_embeddings_are_unit_or_zero(text in ".{0,120}", dim in 1usize..64) {
            let embedder = HashEmbedder::new(dim);
            let v = embedder.embed_sync(&text);
            prop_assert_eq!(v.len(), dim);

            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            let has_tokens = text.chars().any(char::is_alphanumeric);
            if has_tokens && norm > 0.0 {
                prop_assert!((norm - 1.0).abs() < 1e-3);
            } else {
                prop_assert_eq!(norm, 0.0);
            }
            prop_assert_eq!(v, embedder.embed_sync(&text));
        }
    }
}
