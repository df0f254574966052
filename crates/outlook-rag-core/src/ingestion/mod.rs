//! Document ingestion: extraction, chunking, metadata sanitation and indexing.

mod catalog;
mod chunker;
mod processor;
mod service;

use std::sync::Arc;

pub use catalog::{CatalogEntry, DocumentCatalog};
pub use chunker::{
    CharLength, DEFAULT_SEPARATORS, LengthFunction, TextSplitter, TiktokenLength,
    chunk_documents,
};
#[cfg(feature = "tokenizer")]
pub use chunker::TokenizerLength;
pub use processor::{DocumentProcessor, ProcessedDocument, TextExtractor};
pub use service::{ALLOWED_METADATA_FIELDS, IngestionService, sanitize_metadata};

use crate::config::ChunkingConfig;

/// Build the splitter described by the chunking settings.
///
/// Chunk sizes are GPT-2 BPE token counts unless a `tokenizer.json` is
/// configured; characters are only used when no tokenizer can be loaded.
pub fn create_splitter(config: &ChunkingConfig) -> anyhow::Result<TextSplitter> {
    let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap);

    match config.tokenizer_path.as_deref() {
        None => match TiktokenLength::gpt2() {
            Ok(length) => Ok(splitter.with_length_function(Arc::new(length))),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "GPT-2 encoding unavailable; measuring chunks in characters"
                );
                Ok(splitter)
            }
        },
        #[cfg(feature = "tokenizer")]
        Some(path) => Ok(splitter.with_length_function(Arc::new(TokenizerLength::from_file(path)?))),
        #[cfg(not(feature = "tokenizer"))]
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                "tokenizer feature not enabled; measuring chunks in GPT-2 tokens"
            );
            Ok(splitter.with_length_function(Arc::new(TiktokenLength::gpt2()?)))
        }
    }
}
