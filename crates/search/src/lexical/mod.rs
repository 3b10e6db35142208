//! Lexical heuristics over queries and fragment text
//!
//! - `matcher`: fuzzy entity detection and keyword group detection
//! - `booster`: additive keyword bonus for fragments
//! - `normalize`: shared normalization, stemming and string similarity

mod booster;
mod matcher;
mod normalize;

pub use booster::Booster;
pub use matcher::{EntityAlias, EntityMatch, KeywordGroup, LexicalMatcher, Lexicon, QueryAnalysis};
pub use normalize::{levenshtein, normalize, similarity, stem, NormalizedText};
