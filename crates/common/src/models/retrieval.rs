//! Retrieval request/result types shared by the engine, generation and the API

use super::fragment::Fragment;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Fallback stage that contributed a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Entity constrained, keyword boosted
    A,
    /// Unconstrained, keyword boosted
    B,
    /// Unconstrained, unboosted
    C,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::A => "a",
            Tier::B => "b",
            Tier::C => "c",
        }
    }
}

/// Caller-supplied replacements for what the lexical matcher detects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideFilters {
    /// Explicit source ids, used instead of detected entities for tier A
    #[serde(default)]
    pub sources: Option<Vec<String>>,

    /// Explicit keyword group names, used instead of detected groups
    #[serde(default)]
    pub keyword_groups: Option<Vec<String>>,
}

impl OverrideFilters {
    pub fn is_empty(&self) -> bool {
        self.sources.is_none() && self.keyword_groups.is_none()
    }
}

/// A fragment selected for the answer context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub fragment: Fragment,
    /// Post-boost score from the contributing tier
    pub score: f32,
    pub matched_tier: Tier,
}

/// What the engine observed while answering one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDiagnostics {
    /// Canonical entity names used as tier A filters
    pub entities: Vec<String>,
    /// Keyword groups applied as boosts
    pub keyword_groups: Vec<String>,
    /// Fragments contributed by tiers A, B and C
    pub tier_counts: [usize; 3],
    /// Provider or embedding failures swallowed
    pub provider_failures: usize,
    /// Index ids with no fragment in the store
    pub corrupt_references: usize,
}

/// Ordered, deduplicated, bounded result of one retrieval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub fragments: Vec<RetrievedFragment>,
    pub diagnostics: RetrievalDiagnostics,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetrievedFragment> {
        self.fragments.iter()
    }
}

/// Result order: score descending, then `(source_id, page, offset_start)` ascending
pub fn rank_order(a_score: f32, a: &Fragment, b_score: f32, b: &Fragment) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| a.provenance().cmp(&b.provenance()))
}
