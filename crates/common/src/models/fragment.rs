//! Fragment model: the unit of retrieval
//!
//! Fragments are created once at ingestion time and never mutated.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex characters kept from the SHA-256 digest
const FRAGMENT_ID_LEN: usize = 24;

/// Stable fragment identifier derived from provenance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    /// Derive the id for `(source_id, page, offset_start)`
    pub fn derive(source_id: &str, page: u32, offset_start: usize) -> Self {
        let digest = Sha256::digest(format!("{}|{}|{}", source_id, page, offset_start).as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(FRAGMENT_ID_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FragmentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for FragmentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A contiguous, provenance-tagged slice of extracted page text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub source_id: String,
    /// 1-based page number
    pub page: u32,
    /// Character offsets within the page text, end exclusive
    pub offset_start: usize,
    pub offset_end: usize,
    pub text: String,
}

impl Fragment {
    /// Build a fragment; the id and `offset_end` follow from the arguments
    pub fn new(source_id: impl Into<String>, page: u32, offset_start: usize, text: impl Into<String>) -> Self {
        let source_id = source_id.into();
        let text = text.into();
        Self {
            id: FragmentId::derive(&source_id, page, offset_start),
            offset_end: offset_start + text.chars().count(),
            source_id,
            page,
            offset_start,
            text,
        }
    }

    /// Provenance key used for deterministic tie-breaking
    pub fn provenance(&self) -> (&str, u32, usize) {
        (&self.source_id, self.page, self.offset_start)
    }

    /// Citation label such as `abofol#p3`
    pub fn citation(&self) -> String {
        format!("{}#p{}", self.source_id, self.page)
    }

    /// First `max_chars` characters, with an ellipsis when cut
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", head)
        } else {
            head
        }
    }
}

/// Fragment plus its embedding, as written by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFragment {
    #[serde(flatten)]
    pub fragment: Fragment,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable_and_provenance_based() {
        let a = FragmentId::derive("abofol", 2, 1800);
        let b = FragmentId::derive("abofol", 2, 1800);
        let c = FragmentId::derive("abofol", 2, 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), FRAGMENT_ID_LEN);
    }

    #[test]
    fn test_offset_end_counts_chars() {
        let fragment = Fragment::new("amistar", 1, 10, "quemadura ocular");
        assert_eq!(fragment.offset_end, 26);
        assert_eq!(fragment.citation(), "amistar#p1");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let fragment = Fragment::new("s", 1, 0, "ñandú ñandú");
        assert_eq!(fragment.preview(5), "ñandú...");
        assert_eq!(fragment.preview(50), "ñandú ñandú");
    }

    #[test]
    fn test_indexed_fragment_flattens() {
        let indexed = IndexedFragment {
            fragment: Fragment::new("acelepryn", 4, 0, "texto"),
            embedding: vec![0.5, 0.5],
        };
        let json = serde_json::to_value(&indexed).unwrap();
        assert_eq!(json["source_id"], "acelepryn");
        assert_eq!(json["embedding"][1], 0.5);

        let back: IndexedFragment = serde_json::from_value(json).unwrap();
        assert_eq!(back, indexed);
    }
}
