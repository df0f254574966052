use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{MetadataFilter, VectorStore, cosine_distance};
use crate::documents::Document;
use crate::embeddings::DynEmbedder;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedDocument {
    id: String,
    embedding: Vec<f32>,
    document: Document,
}

/// Brute-force cosine index persisted as a single JSON file.
pub struct LocalVectorStore {
    embedder: DynEmbedder,
    path: Option<PathBuf>,
    records: RwLock<Vec<IndexedDocument>>,
}

impl LocalVectorStore {
    /// Volatile store; nothing is written to disk.
    pub fn in_memory(embedder: DynEmbedder) -> Self {
        Self {
            embedder,
            path: None,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Load the index at `path` if it exists; writes go back to the same file.
    pub async fn open(path: impl Into<PathBuf>, embedder: DynEmbedder) -> anyhow::Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<IndexedDocument>>(&bytes)
                .with_context(|| format!("corrupt vector index at {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read vector index {}", path.display()));
            }
        };
        debug!(path = %path.display(), count = records.len(), "opened local vector index");

        Ok(Self {
            embedder,
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Write the full index to a sibling temp file, then rename it over the
    /// index so readers never see a partial file.
    async fn persist(&self, records: &[IndexedDocument]) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(records)?;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("failed to write vector index {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed to replace vector index {}", path.display()))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn check_dimension(expected: usize, actual: usize) -> anyhow::Result<()> {
    if expected != actual {
        return Err(anyhow!(
            "embedding dimension {actual} does not match index dimension {expected}"
        ));
    }
    Ok(())
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn add_documents(&self, docs: Vec<Document>) -> anyhow::Result<Vec<String>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let texts = docs.iter().map(|doc| doc.page_content.clone()).collect();
        let embeddings = self.embedder.embed_documents(texts).await?;
        if embeddings.len() != docs.len() {
            return Err(anyhow!(
                "embedder returned {} vectors for {} documents",
                embeddings.len(),
                docs.len()
            ));
        }

        let mut records = self.records.write().await;
        let dimension = records
            .first()
            .map(|record| record.embedding.len())
            .or_else(|| embeddings.first().map(Vec::len))
            .unwrap_or_default();
        for embedding in &embeddings {
            check_dimension(dimension, embedding.len())?;
        }

        // Memory only changes once the new index is on disk.
        let mut next = records.clone();
        let mut ids = Vec::with_capacity(docs.len());
        for (document, embedding) in docs.into_iter().zip(embeddings) {
            let id = Uuid::new_v4().to_string();
            ids.push(id.clone());
            next.push(IndexedDocument {
                id,
                embedding,
                document,
            });
        }
        self.persist(&next).await?;
        *records = next;
        info!(added = ids.len(), total = records.len(), "indexed documents");
        Ok(ids)
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<(Document, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed_query(query).await?;

        let records = self.records.read().await;
        if let Some(first) = records.first() {
            check_dimension(first.embedding.len(), query_embedding.len())?;
        }
        let mut scored: Vec<(Document, f32)> = records
            .iter()
            .filter(|record| filter.is_none_or(|f| f.matches(&record.document)))
            .map(|record| {
                (
                    record.document.clone(),
                    cosine_distance(&query_embedding, &record.embedding),
                )
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Embeds text as counts of a fixed vocabulary.
    struct VocabEmbedder;

    const VOCAB: [&str; 4] = ["equities", "bonds", "inflation", "growth"];

    #[async_trait]
    impl Embedder for VocabEmbedder {
        async fn embed_documents(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lower = text.to_lowercase();
                    VOCAB
                        .iter()
                        .map(|word| lower.matches(word).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    fn sample_docs() -> Vec<Document> {
        vec![
            Document::new("equities equities growth").with_metadata("doc_type", "forecast"),
            Document::new("bonds and inflation").with_metadata("doc_type", "mid_year"),
            Document::new("equities rallied").with_metadata("doc_type", "mid_year"),
        ]
    }

    #[tokio::test]
    async fn search_orders_by_distance_and_applies_filter() {
        let store = LocalVectorStore::in_memory(Arc::new(VocabEmbedder));
        let ids = store.add_documents(sample_docs()).await.unwrap();
        assert_eq!(ids.len(), 3);

        let hits = store
            .similarity_search_with_score("equities", 3, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|pair| pair[0].1 <= pair[1].1));
        assert_eq!(hits[0].0.page_content, "equities rallied");

        let filter = MetadataFilter::doc_type("forecast");
        let filtered = store
            .similarity_search("equities", 3, Some(&filter))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].metadata_str("doc_type"), Some("forecast"));
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index").join("jpm.json");

        let store = LocalVectorStore::open(&path, Arc::new(VocabEmbedder))
            .await
            .unwrap();
        store.add_documents(sample_docs()).await.unwrap();
        drop(store);

        let reopened = LocalVectorStore::open(&path, Arc::new(VocabEmbedder))
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 3);
        let hits = reopened.similarity_search("bonds", 1, None).await.unwrap();
        assert_eq!(hits[0].page_content, "bonds and inflation");
    }

    /// One dimension per whitespace-separated word.
    struct WordCountEmbedder;

    #[async_trait]
    impl Embedder for WordCountEmbedder {
        async fn embed_documents(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| vec![1.0; text.split_whitespace().count()])
                .collect())
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_index_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jpm.json");
        let store = LocalVectorStore::open(&path, Arc::new(VocabEmbedder))
            .await
            .unwrap();
        store.add_documents(sample_docs()).await.unwrap();

        // A directory squatting on the temp file makes the next write fail.
        std::fs::create_dir(temp_path(&path)).unwrap();
        let result = store
            .add_documents(vec![Document::new("inflation inflation")])
            .await;
        assert!(result.is_err());

        assert_eq!(store.len().await, 3);
        let hits = store.similarity_search("inflation", 3, None).await.unwrap();
        assert!(hits.iter().all(|doc| doc.page_content != "inflation inflation"));

        let reopened = LocalVectorStore::open(&path, Arc::new(VocabEmbedder))
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 3);
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() {
        let store = LocalVectorStore::in_memory(Arc::new(WordCountEmbedder));
        let ragged = vec![Document::new("one two"), Document::new("one two three")];
        let err = store.add_documents(ragged).await.unwrap_err();
        assert!(err.to_string().contains("dimension"));
        assert!(store.is_empty().await);

        store
            .add_documents(vec![Document::new("alpha beta"), Document::new("gamma delta")])
            .await
            .unwrap();
        assert_eq!(store.len().await, 2);

        let err = store
            .similarity_search_with_score("three word query", 1, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not match index dimension 2"));
        assert_eq!(
            store
                .similarity_search_with_score("two words", 1, None)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
