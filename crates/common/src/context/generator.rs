//! Answer generation backends
//!
//! One `Generator` capability with vendor implementations chosen once at
//! startup from `generation.provider`:
//! - `ChatCompletionsGenerator`: OpenAI-compatible APIs (openai, xai, groq)
//! - `OllamaGenerator`: local Ollama `/api/chat`
//! - `ExtractiveGenerator`: no LLM, quotes the retrieved fragments

use super::prompt::{build_prompt, clean_response, source_label, REFUSAL, SYSTEM_PROMPT};
use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::models::{RetrievalResult, RetrievedFragment};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// Generated answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// Backend that produced the text; `None` for the refusal
    pub provider: Option<String>,
    /// Fragments placed in the prompt
    pub sources_used: usize,
}

/// Text generation from a question and retrieved context
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce raw answer text; `hits` is never empty
    async fn generate(&self, question: &str, hits: &[RetrievedFragment]) -> Result<String>;

    /// Name reported alongside answers
    fn provider_name(&self) -> &str;
}

/// Answer a question from a retrieval result
///
/// An empty result short-circuits to the refusal without calling the backend.
#[instrument(skip(generator, result, config), fields(provider = generator.provider_name(), hits = result.len()))]
pub async fn answer_question(
    generator: &dyn Generator,
    question: &str,
    result: &RetrievalResult,
    config: &GenerationConfig,
    max_context: Option<usize>,
) -> Result<Answer> {
    if result.is_empty() {
        return Ok(Answer {
            text: REFUSAL.to_string(),
            provider: None,
            sources_used: 0,
        });
    }

    let limit = max_context.unwrap_or(config.max_context).max(1);
    let hits: Vec<RetrievedFragment> = result.fragments.iter().take(limit).cloned().collect();

    let start = Instant::now();
    let raw = generator.generate(question, &hits).await?;
    let elapsed = start.elapsed().as_secs_f64();
    metrics::record_generation(elapsed, generator.provider_name());

    let text = clean_response(&raw, &config.metadata_markers);
    info!(
        duration_ms = (elapsed * 1000.0) as u64,
        sources_used = hits.len(),
        answer_chars = text.chars().count(),
        "Answer generated"
    );

    Ok(Answer {
        text,
        provider: Some(generator.provider_name().to_string()),
        sources_used: hits.len(),
    })
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: String,
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AppError::Internal {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

async fn check_status(response: reqwest::Response, backend: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(AppError::GenerationError {
        message: format!("{} API error {}: {}", backend, status, body),
    })
}

/// OpenAI-compatible `/chat/completions` client
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    provider: String,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    max_context: usize,
}

impl ChatCompletionsGenerator {
    /// Known vendors and their defaults: (base URL, model)
    fn vendor_defaults(provider: &str) -> Option<(&'static str, &'static str)> {
        match provider {
            "openai" => Some(("https://api.openai.com/v1", "gpt-4o-mini")),
            "xai" => Some(("https://api.x.ai/v1", "grok-2-latest")),
            "groq" => Some(("https://api.groq.com/openai/v1", "llama3-8b-8192")),
            _ => None,
        }
    }

    pub fn new(provider: &str, config: &GenerationConfig) -> Result<Self> {
        let (base_url, model) = Self::vendor_defaults(provider)
            .ok_or_else(|| AppError::config(format!("'{}' is not a chat completions vendor", provider)))?;
        let api_key = config.api_key.clone().ok_or_else(|| {
            AppError::config(format!("generation.api_key is required for the {} provider", provider))
        })?;
        let base_url = config.base_url.as_deref().unwrap_or(base_url).trim_end_matches('/');

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            provider: provider.to_string(),
            endpoint: format!("{}/chat/completions", base_url),
            api_key,
            model: config.model.clone().unwrap_or_else(|| model.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_context: config.max_context,
        })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    async fn generate(&self, question: &str, hits: &[RetrievedFragment]) -> Result<String> {
        let prompt = build_prompt(question, hits, self.max_context.max(hits.len()));
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &prompt },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("{} request failed: {}", self.provider, e),
            })?;

        let chat: ChatResponse = check_status(response, &self.provider)
            .await?
            .json()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("Failed to parse {} response: {}", self.provider, e),
            })?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| AppError::GenerationError {
                message: format!("Empty response from {}", self.provider),
            })
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<ChatMessageResponse>,
}

/// Local Ollama `/api/chat` client
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    max_context: usize,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/');

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/api/chat", base_url),
            model: config.model.clone().unwrap_or_else(|| "llama3.1:8b".to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_context: config.max_context,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, question: &str, hits: &[RetrievedFragment]) -> Result<String> {
        let prompt = build_prompt(question, hits, self.max_context.max(hits.len()));
        let request = OllamaRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &prompt },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("ollama request failed: {}", e),
            })?;

        let body: OllamaResponse = check_status(response, "ollama")
            .await?
            .json()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("Failed to parse ollama response: {}", e),
            })?;

        Ok(body.message.map(|m| m.content.trim().to_string()).unwrap_or_default())
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

/// Offline backend: quotes the retrieved fragments with their sources
pub struct ExtractiveGenerator {
    preview_chars: usize,
}

impl ExtractiveGenerator {
    pub fn new(preview_chars: usize) -> Self {
        Self { preview_chars }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(300)
    }
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    async fn generate(&self, _question: &str, hits: &[RetrievedFragment]) -> Result<String> {
        let mut out = String::from("Información encontrada en los documentos:\n");
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!(
                "\n{} {}\n",
                source_label(i + 1, hit),
                hit.fragment.preview(self.preview_chars)
            ));
        }
        Ok(out)
    }

    fn provider_name(&self) -> &str {
        "extractive"
    }
}

/// Create the generator selected by configuration
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    let provider = config.provider.to_lowercase();
    let generator: Arc<dyn Generator> = match provider.as_str() {
        "openai" | "xai" | "groq" => Arc::new(ChatCompletionsGenerator::new(&provider, config)?),
        "ollama" => Arc::new(OllamaGenerator::new(config)?),
        "extractive" => Arc::new(ExtractiveGenerator::default()),
        other => {
            return Err(AppError::config(format!("Unknown generation provider '{}'", other)));
        }
    };
    info!(provider = generator.provider_name(), "Generator selected");
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fragment, Tier};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for CountingGenerator {
        async fn generate(&self, _question: &str, hits: &[RetrievedFragment]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("Respuesta con {} fuentes\nFecha de revisión: 2020-01-01", hits.len()))
        }

        fn provider_name(&self) -> &str {
            "counting"
        }
    }

    fn result_with(n: usize) -> RetrievalResult {
        RetrievalResult {
            fragments: (0..n)
                .map(|i| RetrievedFragment {
                    fragment: Fragment::new("abofol", 1, i * 100, format!("fragmento {}", i)),
                    score: 1.0 - i as f32 * 0.1,
                    matched_tier: Tier::B,
                })
                .collect(),
            diagnostics: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_empty_result_refuses_without_calling_backend() {
        let generator = CountingGenerator { calls: AtomicUsize::new(0) };
        let answer = answer_question(&generator, "q", &RetrievalResult::default(), &GenerationConfig::default(), None)
            .await
            .unwrap();

        assert_eq!(answer.text, REFUSAL);
        assert_eq!(answer.provider, None);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_answer_is_bounded_and_cleaned() {
        let generator = CountingGenerator { calls: AtomicUsize::new(0) };
        let answer = answer_question(&generator, "q", &result_with(5), &GenerationConfig::default(), Some(2))
            .await
            .unwrap();

        assert_eq!(answer.text, "Respuesta con 2 fuentes");
        assert_eq!(answer.sources_used, 2);
        assert_eq!(answer.provider.as_deref(), Some("counting"));
    }

    #[tokio::test]
    async fn test_extractive_quotes_sources() {
        let generator = ExtractiveGenerator::new(8);
        let text = generator.generate("q", &result_with(2).fragments).await.unwrap();
        assert!(text.contains("[Fuente 1: abofol#p1] fragment..."));
        assert!(text.contains("[Fuente 2: abofol#p1]"));
    }

    #[test]
    fn test_create_generator_selection() {
        let mut config = GenerationConfig::default();
        assert_eq!(create_generator(&config).unwrap().provider_name(), "extractive");

        config.provider = "groq".into();
        assert!(create_generator(&config).is_err());

        config.api_key = Some("key".into());
        assert_eq!(create_generator(&config).unwrap().provider_name(), "groq");

        config.provider = "ollama".into();
        assert_eq!(create_generator(&config).unwrap().provider_name(), "ollama");

        config.provider = "bedrock".into();
        assert!(create_generator(&config).is_err());
    }

    #[test]
    fn test_base_url_override() {
        let config = GenerationConfig {
            provider: "xai".into(),
            api_key: Some("k".into()),
            base_url: Some("http://proxy.local/v1/".into()),
            ..Default::default()
        };
        let generator = ChatCompletionsGenerator::new("xai", &config).unwrap();
        assert_eq!(generator.endpoint, "http://proxy.local/v1/chat/completions");
        assert_eq!(generator.model, "grok-2-latest");
    }
}
