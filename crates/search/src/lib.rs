//! sdsforge Search Library
//!
//! Retrieval heuristics over indexed safety-data-sheet fragments:
//! - Fuzzy entity detection and keyword detection over the query
//! - Keyword boosts over fragment text
//! - Tiered retrieval engine (entity filtered, boosted, plain)

pub mod lexical;
pub mod retrieval;

pub use lexical::{Booster, LexicalMatcher, Lexicon, QueryAnalysis};
pub use retrieval::RetrievalEngine;
