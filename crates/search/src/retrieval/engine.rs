//! Tiered retrieval with progressive filter relaxation
//!
//! Tiers run in strict order; later tiers only fill slots left open:
//! - A: one similarity search per detected entity, restricted to its sources, keyword boosted
//! - B: unrestricted search, keyword boosted (skipped when no keyword group applies)
//! - C: unrestricted search, raw similarity
//!
//! A fragment keeps the tier and score of the first tier that admitted it.

use crate::lexical::{Booster, KeywordGroup, LexicalMatcher, QueryAnalysis};
use sdsforge_common::config::AppConfig;
use sdsforge_common::embeddings::Embedder;
use sdsforge_common::errors::{AppError, Result};
use sdsforge_common::index::{FragmentStore, IndexHandle, ScoredId, SimilarityProvider, SourceFilter};
use sdsforge_common::metrics;
use sdsforge_common::models::{
    rank_order, Fragment, FragmentId, OverrideFilters, RetrievalDiagnostics, RetrievalResult,
    RetrievedFragment, Tier,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Tier A filter: a label for diagnostics plus the sources it admits
#[derive(Debug, Clone)]
struct EntityFilter {
    label: String,
    filter: SourceFilter,
}

/// What the lexical pass decided for one query
struct TierPlan<'a> {
    entity_filters: Vec<EntityFilter>,
    groups: Vec<&'a KeywordGroup>,
}

/// Per-query scratch state shared across tiers
#[derive(Default)]
struct QueryState {
    fetched: HashMap<FragmentId, Fragment>,
    corrupt: HashSet<FragmentId>,
    provider_failures: usize,
    selected: Vec<RetrievedFragment>,
    seen: HashSet<FragmentId>,
    tier_counts: [usize; 3],
}

/// Orchestrates matcher, booster and similarity provider
pub struct RetrievalEngine {
    matcher: LexicalMatcher,
    booster: Booster,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn FragmentStore>,
    provider: Arc<dyn SimilarityProvider>,
    default_top_k: usize,
    candidate_multiplier: usize,
}

impl RetrievalEngine {
    pub fn new(
        matcher: LexicalMatcher,
        booster: Booster,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn FragmentStore>,
        provider: Arc<dyn SimilarityProvider>,
    ) -> Self {
        Self {
            matcher,
            booster,
            embedder,
            store,
            provider,
            default_top_k: 6,
            candidate_multiplier: 3,
        }
    }

    /// Build from loaded configuration and an opened index
    pub fn from_config(config: &AppConfig, embedder: Arc<dyn Embedder>, index: &IndexHandle) -> Result<Self> {
        let matcher = LexicalMatcher::from_config(&config.lexicon, &config.retrieval)?;
        Ok(Self::new(
            matcher,
            Booster::new(config.retrieval.boost_cap),
            embedder,
            index.store.clone(),
            index.provider.clone(),
        )
        .with_default_top_k(config.retrieval.default_top_k)
        .with_candidate_multiplier(config.retrieval.candidate_multiplier))
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    pub fn with_candidate_multiplier(mut self, multiplier: usize) -> Self {
        self.candidate_multiplier = multiplier.max(1);
        self
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub fn matcher(&self) -> &LexicalMatcher {
        &self.matcher
    }

    /// Retrieve up to `top_k` fragments for `query`
    ///
    /// Fails only on an empty query. Provider failures and dangling ids are
    /// logged, counted in the diagnostics and never surface as errors.
    #[instrument(skip(self, overrides))]
    pub async fn retrieve(&self, query: &str, top_k: usize, overrides: &OverrideFilters) -> Result<RetrievalResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidQuery {
                message: "query is empty".to_string(),
            });
        }
        if top_k == 0 {
            return Ok(RetrievalResult::default());
        }

        let start = Instant::now();
        let analysis = self.matcher.analyze(query);
        let plan = self.plan(&analysis, overrides);
        let mut state = QueryState::default();

        match self.embedder.embed(query).await {
            Ok(vector) => self.run_tiers(&vector, top_k, &plan, &mut state).await,
            Err(e) => {
                warn!(error = %e, "Query embedding failed, returning empty result");
                metrics::record_provider_failure("embed");
                state.provider_failures += 1;
            }
        }

        let QueryState {
            corrupt,
            provider_failures,
            mut selected,
            tier_counts,
            ..
        } = state;

        selected.sort_by(|a, b| rank_order(a.score, &a.fragment, b.score, &b.fragment));
        selected.truncate(top_k);

        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_retrieval(elapsed, selected.len(), !plan.entity_filters.is_empty());
        for (tier, count) in [Tier::A, Tier::B, Tier::C].iter().zip(tier_counts) {
            metrics::record_tier(tier.as_str(), count);
        }
        metrics::record_corrupt_references(corrupt.len());

        let diagnostics = RetrievalDiagnostics {
            entities: plan.entity_filters.iter().map(|f| f.label.clone()).collect(),
            keyword_groups: plan.groups.iter().map(|g| g.name.clone()).collect(),
            tier_counts,
            provider_failures,
            corrupt_references: corrupt.len(),
        };

        info!(
            results = selected.len(),
            tier_a = tier_counts[0],
            tier_b = tier_counts[1],
            tier_c = tier_counts[2],
            entities = ?diagnostics.entities,
            keyword_groups = ?diagnostics.keyword_groups,
            provider_failures,
            corrupt_references = diagnostics.corrupt_references,
            duration_ms = (elapsed * 1000.0) as u64,
            "Retrieval completed"
        );

        Ok(RetrievalResult {
            fragments: selected,
            diagnostics,
        })
    }

    /// Resolve overrides against what the matcher detected
    fn plan<'a>(&'a self, analysis: &QueryAnalysis, overrides: &OverrideFilters) -> TierPlan<'a> {
        let lexicon = self.matcher.lexicon();

        let entity_filters = match &overrides.sources {
            Some(sources) => sources
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| EntityFilter {
                    label: s.to_string(),
                    filter: SourceFilter::new([s]),
                })
                .collect(),
            None => analysis
                .entities
                .iter()
                .filter_map(|m| lexicon.entity(&m.entity))
                .map(|e| EntityFilter {
                    label: e.name.clone(),
                    filter: SourceFilter::new(e.sources.iter().cloned()),
                })
                .collect(),
        };

        let group_names = overrides
            .keyword_groups
            .as_ref()
            .unwrap_or(&analysis.keyword_groups);
        let groups = group_names
            .iter()
            .filter_map(|name| {
                let group = lexicon.group(name);
                if group.is_none() {
                    debug!(group = %name, "Ignoring unknown keyword group");
                }
                group
            })
            .collect();

        TierPlan { entity_filters, groups }
    }

    async fn run_tiers(&self, vector: &[f32], top_k: usize, plan: &TierPlan<'_>, state: &mut QueryState) {
        let k = top_k.saturating_mul(self.candidate_multiplier);

        // Tier A
        if !plan.entity_filters.is_empty() {
            let mut pool = Vec::new();
            for entity in &plan.entity_filters {
                let allowed = match self.store.filter_candidates(&entity.filter).await {
                    Ok(allowed) => allowed,
                    Err(e) => {
                        self.provider_failed("tier_a", &e, state);
                        continue;
                    }
                };
                if allowed.is_empty() {
                    debug!(entity = %entity.label, "Entity has no indexed fragments");
                    continue;
                }

                let hits = match self.provider.search(vector, k.min(allowed.len()), Some(&entity.filter)).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        self.provider_failed("tier_a", &e, state);
                        continue;
                    }
                };
                let hits: Vec<ScoredId> = hits.into_iter().filter(|h| allowed.contains(&h.id)).collect();
                pool.extend(self.resolve(hits, &plan.groups, state).await);
            }
            admit(Tier::A, pool, top_k, state);
        }

        // Tier B
        if state.selected.len() < top_k && !plan.groups.is_empty() {
            match self.provider.search(vector, k, None).await {
                Ok(hits) => {
                    let pool = self.resolve(hits, &plan.groups, state).await;
                    admit(Tier::B, pool, top_k, state);
                }
                Err(e) => self.provider_failed("tier_b", &e, state),
            }
        }

        // Tier C
        if state.selected.len() < top_k {
            match self.provider.search(vector, k, None).await {
                Ok(hits) => {
                    let pool = self.resolve(hits, &[], state).await;
                    admit(Tier::C, pool, top_k, state);
                }
                Err(e) => self.provider_failed("tier_c", &e, state),
            }
        }
    }

    /// Turn scored ids into boosted `(score, fragment)` candidates
    ///
    /// Ids the store cannot resolve are recorded as corrupt and dropped.
    async fn resolve(
        &self,
        hits: Vec<ScoredId>,
        groups: &[&KeywordGroup],
        state: &mut QueryState,
    ) -> Vec<(f32, Fragment)> {
        let missing: Vec<FragmentId> = hits
            .iter()
            .map(|h| &h.id)
            .filter(|id| !state.fetched.contains_key(*id) && !state.corrupt.contains(*id))
            .cloned()
            .collect();

        if !missing.is_empty() {
            match self.store.get_by_ids(&missing).await {
                Ok(fragments) => {
                    for fragment in fragments {
                        state.fetched.insert(fragment.id.clone(), fragment);
                    }
                    for id in missing {
                        if !state.fetched.contains_key(&id) {
                            let error = AppError::CorruptFragmentReference { id: id.to_string() };
                            warn!(error = %error, "Skipping dangling fragment reference");
                            state.corrupt.insert(id);
                        }
                    }
                }
                Err(e) => {
                    self.provider_failed("fetch", &e, state);
                    return Vec::new();
                }
            }
        }

        hits.into_iter()
            .filter_map(|hit| {
                let fragment = state.fetched.get(&hit.id)?;
                let score = self.booster.apply(hit.score, &fragment.text, groups);
                Some((score, fragment.clone()))
            })
            .collect()
    }

    fn provider_failed(&self, stage: &str, error: &AppError, state: &mut QueryState) {
        warn!(stage, error = %error, "Similarity provider failed, treating tier as empty");
        metrics::record_provider_failure(stage);
        state.provider_failures += 1;
    }
}

/// Rank a tier's candidates and append unseen ones until `top_k` is reached
fn admit(tier: Tier, mut pool: Vec<(f32, Fragment)>, top_k: usize, state: &mut QueryState) {
    pool.sort_by(|a, b| rank_order(a.0, &a.1, b.0, &b.1));

    let slot = match tier {
        Tier::A => 0,
        Tier::B => 1,
        Tier::C => 2,
    };
    for (score, fragment) in pool {
        if state.selected.len() >= top_k {
            break;
        }
        if !state.seen.insert(fragment.id.clone()) {
            continue;
        }
        state.tier_counts[slot] += 1;
        state.selected.push(RetrievedFragment {
            fragment,
            score,
            matched_tier: tier,
        });
    }
}
