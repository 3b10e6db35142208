//! sdsforge ingestion
//!
//! Turns a directory of safety data sheets (PDF) into indexed fragments:
//! 1. Extract text page by page
//! 2. Cut each page into overlapping character windows
//! 3. Embed the windows in batches
//! 4. Replace the source's fragments in the index

pub mod chunker;
pub mod errors;
pub mod pdf;
pub mod processor;

pub use chunker::{chunk_text, ChunkingConfig, TextChunk};
pub use errors::IngestionError;
pub use pdf::{extract_pages, PageText};
pub use processor::{IngestionProcessor, IngestionReport, SourceReport};
