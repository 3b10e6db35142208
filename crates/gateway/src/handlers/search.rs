//! Retrieval and answer handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::AppState;
use sdsforge_common::{
    context::answer_question,
    errors::{AppError, Result},
    models::{OverrideFilters, RetrievalResult},
};

/// Characters of fragment text returned as a source preview
const PREVIEW_CHARS: usize = 300;

/// Retrieval request
#[derive(Debug, Deserialize, Validate)]
pub struct RetrieveRequest {
    #[validate(length(max = 2000))]
    pub query: String,

    /// Defaults to `retrieval.default_top_k`; negative values yield no results
    #[validate(range(max = 100))]
    pub top_k: Option<i64>,

    /// Restrict tier A to these source ids instead of detected entities
    pub sources: Option<Vec<String>>,

    /// Boost with these keyword groups instead of detected ones
    pub keyword_groups: Option<Vec<String>>,
}

/// Question answering request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(max = 2000))]
    pub question: String,

    #[validate(range(max = 100))]
    pub top_k: Option<i64>,

    /// Skip generation and return only the sources
    #[serde(default)]
    pub only_retrieve: bool,

    /// Fragments placed in the prompt; defaults to `generation.max_context`
    #[validate(range(min = 1, max = 50))]
    pub max_context: Option<usize>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub answer: Option<String>,
    pub provider: Option<String>,
    pub sources: Vec<SourceItem>,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SourceItem {
    pub source_id: String,
    pub page: u32,
    pub offset_start: usize,
    pub score: f32,
    pub tier: String,
    pub preview: String,
}

fn validate<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })
}

/// Requested result count; absent means the configured default, negative means none
fn effective_top_k(state: &AppState, top_k: Option<i64>) -> usize {
    match top_k {
        None => state.engine.default_top_k(),
        Some(k) => usize::try_from(k).unwrap_or(0),
    }
}

/// Fragments used as context: `max_context` (or the configured default), at least one
fn context_limit(state: &AppState, request: &QueryRequest, available: usize) -> usize {
    request
        .max_context
        .unwrap_or(state.config.generation.max_context)
        .min(available)
        .max(1)
}

fn source_items(result: &RetrievalResult, limit: usize) -> Vec<SourceItem> {
    result
        .iter()
        .take(limit)
        .map(|hit| SourceItem {
            source_id: hit.fragment.source_id.clone(),
            page: hit.fragment.page,
            offset_start: hit.fragment.offset_start,
            score: hit.score,
            tier: hit.matched_tier.as_str().to_string(),
            preview: hit.fragment.preview(PREVIEW_CHARS),
        })
        .collect()
}

async fn retrieve_for_question(state: &AppState, request: &QueryRequest) -> Result<RetrievalResult> {
    validate(request)?;
    let top_k = effective_top_k(state, request.top_k);
    state
        .engine
        .retrieve(&request.question, top_k, &OverrideFilters::default())
        .await
}

/// Tiered retrieval with scores and diagnostics
pub async fn retrieve(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrievalResult>> {
    let start = Instant::now();
    validate(&request)?;

    let top_k = effective_top_k(&state, request.top_k);
    let overrides = OverrideFilters {
        sources: request.sources,
        keyword_groups: request.keyword_groups,
    };
    let result = state.engine.retrieve(&request.query, top_k, &overrides).await?;

    tracing::info!(
        top_k,
        results = result.len(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Retrieve completed"
    );
    Ok(Json(result))
}

/// Answer a question and list the cited sources
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();
    let result = retrieve_for_question(&state, &request).await?;

    let (answer, provider) = if request.only_retrieve || result.is_empty() {
        (None, None)
    } else {
        let answer = answer_question(
            state.generator.as_ref(),
            &request.question,
            &result,
            &state.config.generation,
            request.max_context,
        )
        .await?;
        (Some(answer.text), answer.provider)
    };

    let processing_time_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        results = result.len(),
        answered = answer.is_some(),
        latency_ms = processing_time_ms,
        "Query completed"
    );

    Ok(Json(QueryResponse {
        answer,
        provider,
        sources: source_items(&result, context_limit(&state, &request, result.len())),
        processing_time_ms,
    }))
}

/// Plain-text answer; empty when nothing was retrieved.
/// With `only_retrieve`, the context previews one per line instead.
pub async fn answer(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> Result<String> {
    let result = retrieve_for_question(&state, &request).await?;
    if result.is_empty() {
        return Ok(String::new());
    }

    if request.only_retrieve {
        let limit = context_limit(&state, &request, result.len());
        let previews: Vec<String> = result
            .iter()
            .take(limit)
            .map(|hit| hit.fragment.preview(PREVIEW_CHARS).replace('\n', " "))
            .collect();
        return Ok(previews.join("\n"));
    }

    let answer = answer_question(
        state.generator.as_ref(),
        &request.question,
        &result,
        &state.config.generation,
        request.max_context,
    )
    .await?;
    Ok(answer.text)
}
