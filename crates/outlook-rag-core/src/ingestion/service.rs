use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use super::catalog::DocumentCatalog;
use super::chunker::{TextSplitter, chunk_documents};
use super::processor::DocumentProcessor;
use crate::RagError;
use crate::documents::{Document, Metadata};
use crate::vectorstore::VectorStore;

/// Metadata fields persisted alongside each chunk.
pub const ALLOWED_METADATA_FIELDS: [&str; 11] = [
    "source",
    "filename",
    "page_number",
    "page",
    "start_index",
    "chunk_id",
    "doc_type",
    "doc_name",
    "date_context",
    "category",
    "element_id",
];

/// Keep only allowed fields holding scalar values.
pub fn sanitize_metadata(doc: Document) -> Document {
    let metadata: Metadata = doc
        .metadata
        .into_iter()
        .filter(|(key, _)| ALLOWED_METADATA_FIELDS.contains(&key.as_str()))
        .filter(|(_, value)| {
            matches!(
                value,
                Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null
            )
        })
        .collect();

    Document {
        page_content: doc.page_content,
        metadata,
    }
}

/// Extract → chunk → sanitize → upsert.
pub struct IngestionService {
    processor: Arc<dyn DocumentProcessor>,
    store: Arc<dyn VectorStore>,
    splitter: TextSplitter,
}

impl IngestionService {
    pub fn new(
        processor: Arc<dyn DocumentProcessor>,
        store: Arc<dyn VectorStore>,
        splitter: TextSplitter,
    ) -> Self {
        Self {
            processor,
            store,
            splitter,
        }
    }

    /// Ingest a single file, returning the number of chunks indexed.
    #[instrument(name = "ingest.file", skip(self, metadata), fields(path = %path.display()))]
    pub async fn ingest_file(&self, path: &Path, metadata: Option<&Metadata>) -> Result<usize> {
        if !self.processor.can_process(path) {
            let ext = path
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            return Err(RagError::UnsupportedFile(ext).into());
        }

        let processor = self.processor.clone();
        let owned_path = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || processor.process(&owned_path))
            .await
            .context("document processing task panicked")?;
        if let Some(error) = result.error {
            return Err(RagError::Processing(error).into());
        }

        let mut documents = result.documents;
        if let Some(extra) = metadata {
            for doc in documents.iter_mut() {
                doc.metadata
                    .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        let chunks: Vec<Document> = chunk_documents(&documents, &self.splitter)
            .into_iter()
            .map(sanitize_metadata)
            .collect();
        let count = chunks.len();

        debug!(
            pages = ?result.page_count,
            chunks = count,
            "indexing extracted chunks"
        );
        if count > 0 {
            self.store.add_documents(chunks).await?;
        }
        Ok(count)
    }

    /// Ingest every supported file directly inside `directory`, in name order.
    pub async fn ingest_directory(
        &self,
        directory: &Path,
        catalog: &DocumentCatalog,
    ) -> Result<usize> {
        let files: Vec<PathBuf> = WalkDir::new(directory)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.processor.can_process(path))
            .collect();

        let mut total = 0;
        for file in files {
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let metadata = catalog.get(&file_name).map(|entry| entry.to_metadata());

            let chunks = self.ingest_file(&file, metadata.as_ref()).await?;
            total += chunks;
            info!(filename = %file_name, chunks, "file_ingested");
        }
        Ok(total)
    }
}
