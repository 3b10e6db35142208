//! Fuzzy entity detection and keyword group detection over a query
//!
//! The matcher is a pure function of (query, lexicon, thresholds): no I/O,
//! no randomness. Results are deterministic down to their order.

use super::normalize::{normalize, similarity, NormalizedText};
use sdsforge_common::config::{LexiconConfig, RetrievalConfig};
use sdsforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Canonical entity with its normalized surface forms
#[derive(Debug, Clone, PartialEq)]
pub struct EntityAlias {
    pub name: String,
    /// Normalized aliases, the canonical name included
    pub aliases: Vec<String>,
    /// Source ids whose fragments belong to the entity
    pub sources: Vec<String>,
}

/// Domain vocabulary that earns a score bonus
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordGroup {
    pub name: String,
    /// Normalized terms
    pub terms: Vec<String>,
    pub boost: f32,
}

/// Immutable alias and keyword tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lexicon {
    entities: Vec<EntityAlias>,
    groups: Vec<KeywordGroup>,
}

impl Lexicon {
    pub fn new(entities: Vec<EntityAlias>, groups: Vec<KeywordGroup>) -> Self {
        Self { entities, groups }
    }

    /// Build from configuration; aliases and terms are normalized once here
    pub fn from_config(lexicon: &LexiconConfig, retrieval: &RetrievalConfig) -> Result<Self> {
        let mut entities = Vec::with_capacity(lexicon.entities.len());
        for entity in &lexicon.entities {
            let name = entity.name.trim().to_string();
            let mut aliases: Vec<String> = std::iter::once(name.as_str())
                .chain(entity.aliases.iter().map(String::as_str))
                .map(normalize)
                .filter(|a| !a.is_empty())
                .collect();
            aliases.sort();
            aliases.dedup();
            if aliases.is_empty() {
                return Err(AppError::config(format!("entity '{}' has no usable alias", entity.name)));
            }

            let sources = if entity.sources.is_empty() {
                vec![name.clone()]
            } else {
                entity.sources.clone()
            };
            entities.push(EntityAlias { name, aliases, sources });
        }

        let groups = lexicon
            .keyword_groups
            .iter()
            .map(|group| KeywordGroup {
                name: group.name.clone(),
                terms: group.terms.iter().map(|t| normalize(t)).filter(|t| !t.is_empty()).collect(),
                boost: group.boost.unwrap_or(retrieval.keyword_boost),
            })
            .collect();

        Ok(Self { entities, groups })
    }

    pub fn entities(&self) -> &[EntityAlias] {
        &self.entities
    }

    pub fn groups(&self) -> &[KeywordGroup] {
        &self.groups
    }

    pub fn entity(&self, name: &str) -> Option<&EntityAlias> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&KeywordGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// One detected entity and the query span that triggered it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub entity: String,
    pub alias: String,
    pub candidate: String,
    pub similarity: f32,
}

/// Lexical signals extracted from a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// Alternative entity filters, best match first
    pub entities: Vec<EntityMatch>,
    /// Matched keyword group names, in lexicon order
    pub keyword_groups: Vec<String>,
}

/// Fuzzy entity and keyword detector
#[derive(Debug, Clone)]
pub struct LexicalMatcher {
    lexicon: Lexicon,
    threshold: f32,
    min_token_chars: usize,
}

impl LexicalMatcher {
    pub fn new(lexicon: Lexicon, threshold: f32, min_token_chars: usize) -> Self {
        Self {
            lexicon,
            threshold,
            min_token_chars,
        }
    }

    pub fn from_config(lexicon: &LexiconConfig, retrieval: &RetrievalConfig) -> Result<Self> {
        Ok(Self::new(
            Lexicon::from_config(lexicon, retrieval)?,
            retrieval.fuzzy_threshold,
            retrieval.min_token_chars,
        ))
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Detect entities and keyword groups in one pass over the query
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let text = NormalizedText::new(query);
        QueryAnalysis {
            entities: self.detect_entities(&text),
            keyword_groups: self.detect_keyword_groups(&text),
        }
    }

    /// Every entity whose best alias/candidate similarity reaches the threshold
    ///
    /// Candidates are runs of consecutive query tokens with as many words as
    /// the alias, so multi-word aliases ("amistar xtra") compare like for like.
    pub fn detect_entities(&self, text: &NormalizedText) -> Vec<EntityMatch> {
        let tokens = text.tokens();
        let mut matches = Vec::new();

        for entity in self.lexicon.entities() {
            let mut best: Option<EntityMatch> = None;
            for alias in &entity.aliases {
                let width = alias.split(' ').count();
                if width == 0 || width > tokens.len() {
                    continue;
                }
                for window in tokens.windows(width) {
                    let candidate = window.join(" ");
                    if candidate.chars().count() < self.min_token_chars {
                        continue;
                    }
                    let score = similarity(&candidate, alias);
                    if score < self.threshold {
                        continue;
                    }
                    // On equal similarity the longer (more specific) alias wins
                    let better = best.as_ref().map_or(true, |b| {
                        score > b.similarity
                            || (score == b.similarity
                                && (alias.len(), std::cmp::Reverse(alias.as_str()))
                                    > (b.alias.len(), std::cmp::Reverse(b.alias.as_str())))
                    });
                    if better {
                        best = Some(EntityMatch {
                            entity: entity.name.clone(),
                            alias: alias.clone(),
                            candidate,
                            similarity: score,
                        });
                    }
                }
            }
            matches.extend(best);
        }

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity.cmp(&b.entity))
        });
        matches
    }

    /// Names of keyword groups with at least one term in the query
    pub fn detect_keyword_groups(&self, text: &NormalizedText) -> Vec<String> {
        self.lexicon
            .groups()
            .iter()
            .filter(|g| g.terms.iter().any(|t| text.mentions(t)))
            .map(|g| g.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> LexicalMatcher {
        LexicalMatcher::from_config(&LexiconConfig::default(), &RetrievalConfig::default()).unwrap()
    }

    #[test]
    fn test_typo_matches_entity() {
        let analysis = matcher().analyze("abofoll primeros auxilios ojos");
        assert_eq!(analysis.entities.len(), 1);
        assert_eq!(analysis.entities[0].entity, "abofol");
        assert_eq!(analysis.entities[0].similarity, 1.0);
        assert_eq!(analysis.keyword_groups, vec!["first_aid", "eyes"]);
    }

    #[test]
    fn test_fuzzy_match_below_exact() {
        let analysis = matcher().analyze("ficha de acelpryn");
        assert_eq!(analysis.entities[0].entity, "acelepryn");
        assert!(analysis.entities[0].similarity < 1.0);
        assert!(analysis.entities[0].similarity >= 0.8);
    }

    #[test]
    fn test_multi_word_alias() {
        let analysis = matcher().analyze("AMISTAR-XTRA incendio");
        assert_eq!(analysis.entities[0].entity, "amistar");
        assert_eq!(analysis.entities[0].alias, "amistar xtra");
        assert_eq!(analysis.keyword_groups, vec!["fire"]);
    }

    #[test]
    fn test_multiple_entities_are_alternatives() {
        let analysis = matcher().analyze("diferencias entre amistar y abofol");
        let names: Vec<_> = analysis.entities.iter().map(|e| e.entity.as_str()).collect();
        assert_eq!(names, vec!["abofol", "amistar"]);
    }

    #[test]
    fn test_no_match() {
        let analysis = matcher().analyze("hola, ¿qué tal?");
        assert!(analysis.entities.is_empty());
        assert!(analysis.keyword_groups.is_empty());
    }

    #[test]
    fn test_diacritics_and_plurals() {
        let analysis = matcher().analyze("QUEMADURAS en la Piel y lesión OCULAR");
        assert_eq!(analysis.keyword_groups, vec!["burns", "skin", "eyes"]);
    }

    #[test]
    fn test_short_tokens_never_match() {
        let lexicon = Lexicon::new(
            vec![EntityAlias {
                name: "ab".into(),
                aliases: vec!["ab".into()],
                sources: vec!["ab".into()],
            }],
            vec![],
        );
        let matcher = LexicalMatcher::new(lexicon, 0.8, 3);
        assert!(matcher.analyze("ab ab").entities.is_empty());
    }

    #[test]
    fn test_group_boost_override() {
        let mut config = LexiconConfig::default();
        config.keyword_groups[0].boost = Some(0.25);
        let lexicon = Lexicon::from_config(&config, &RetrievalConfig::default()).unwrap();
        assert_eq!(lexicon.group("burns").unwrap().boost, 0.25);
        assert_eq!(lexicon.group("eyes").unwrap().boost, 0.15);
        assert_eq!(lexicon.entity("amistar").unwrap().sources, vec!["amistar"]);
    }
}
