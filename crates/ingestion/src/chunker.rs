//! Text chunking module
//!
//! Splits page text into overlapping character windows. A window that would
//! cut a word prefers to end at the last whitespace in its trailing quarter,
//! as long as the shortened window stays longer than the overlap. Consecutive
//! windows therefore always share exactly `chunk_overlap` characters.
//! Offsets count characters, not bytes.

use crate::errors::IngestionError;
use sdsforge_common::config::ChunkingConfig as ChunkingSettings;
use tracing::debug;

/// Window geometry, validated on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestionError> {
        if chunk_size == 0 {
            return Err(IngestionError::Chunking("chunk_size must be > 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestionError::Chunking(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self, IngestionError> {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 200,
        }
    }
}

/// A trimmed, non-empty chunk with its character offset in the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    /// Position of this chunk among the page's chunks
    pub index: usize,
    /// Character offset of `content` in the page text
    pub offset: usize,
}

/// Raw `[start, end)` character windows covering `chars`
pub(crate) fn windows(chars: &[char], config: &ChunkingConfig) -> Vec<(usize, usize)> {
    let total = chars.len();
    let size = config.chunk_size;
    let mut out = Vec::new();
    let mut start = 0;

    while start < total {
        let mut end = (start + size).min(total);
        if end < total {
            let min_cut = size - size / 4;
            if let Some(cut) = chars[start..end].iter().rposition(|c| c.is_whitespace()) {
                if cut > config.chunk_overlap && cut >= min_cut {
                    end = start + cut;
                }
            }
        }
        out.push((start, end));
        if end == total {
            break;
        }
        // end - start > chunk_overlap here, so the next start always advances
        start = end - config.chunk_overlap;
    }

    out
}

/// Split text into chunks; whitespace-only windows are dropped
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let spans = windows(&chars, config);

    let mut chunks = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        let window = &chars[start..end];
        let Some(first) = window.iter().position(|c| !c.is_whitespace()) else {
            continue;
        };
        let last = window.iter().rposition(|c| !c.is_whitespace()).unwrap_or(first);
        chunks.push(TextChunk {
            content: window[first..=last].iter().collect(),
            index: chunks.len(),
            offset: start + first,
        });
    }

    debug!(
        input_chars = chars.len(),
        chunk_count = chunks.len(),
        chunk_size = config.chunk_size,
        "Text chunked"
    );

    chunks
}
