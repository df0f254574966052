//! Vector index abstraction with a persistent local backend and an optional Qdrant backend.

mod local;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use local::LocalVectorStore;
#[cfg(feature = "qdrant")]
pub use qdrant::{QdrantConfig, QdrantVectorStore};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Settings, VectorBackend};
use crate::documents::Document;
use crate::embeddings::DynEmbedder;

/// Exact-match restriction on a single metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub key: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn doc_type(value: impl Into<String>) -> Self {
        Self::new("doc_type", value)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.metadata_str(&self.key) == Some(self.value.as_str())
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and store documents, returning their assigned ids.
    async fn add_documents(&self, docs: Vec<Document>) -> anyhow::Result<Vec<String>>;

    /// Nearest documents with their distance (lower is more similar), ascending.
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<(Document, f32)>>;

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<Document>> {
        Ok(self
            .similarity_search_with_score(query, k, filter)
            .await?
            .into_iter()
            .map(|(doc, _)| doc)
            .collect())
    }
}

pub type DynVectorStore = Arc<dyn VectorStore>;

/// Open the configured index backend on top of `embedder`.
pub async fn create_vectorstore(
    settings: &Settings,
    embedder: DynEmbedder,
) -> anyhow::Result<DynVectorStore> {
    match settings.retrieval.backend {
        VectorBackend::Local => {
            let path = settings
                .paths
                .index_dir
                .join(format!("{}.json", settings.retrieval.collection));
            Ok(Arc::new(LocalVectorStore::open(path, embedder).await?))
        }
        #[cfg(feature = "qdrant")]
        VectorBackend::Qdrant => {
            let config = QdrantConfig {
                url: settings.retrieval.qdrant_url.clone(),
                collection: settings.retrieval.collection.clone(),
                concurrency_limit: settings.retrieval.qdrant_concurrency,
            };
            Ok(Arc::new(QdrantVectorStore::new(config, embedder)?))
        }
        #[cfg(not(feature = "qdrant"))]
        VectorBackend::Qdrant => Err(anyhow::anyhow!(
            "retrieval.backend = \"qdrant\" requires building with the `qdrant` feature"
        )),
    }
}

/// Cosine distance in `[0, 2]`; a zero vector is treated as orthogonal to everything.
/// Both vectors must have the same dimension.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
