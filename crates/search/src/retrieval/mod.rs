//! Retrieval engine
//!
//! Combines semantic similarity with lexical heuristics through a tiered
//! fallback, then merges, deduplicates and bounds the result.

mod engine;

pub use engine::RetrievalEngine;
