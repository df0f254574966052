//! Text embedding backends.

#[cfg(feature = "fastembed")]
mod fastembed;
mod openai;

#[cfg(feature = "fastembed")]
pub use self::fastembed::FastEmbedder;
pub use openai::OpenAiEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingProvider, Settings};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_documents(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_documents(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedding model returned empty result"))
    }
}

pub type DynEmbedder = Arc<dyn Embedder>;

/// Build the embedder selected in `embedding.provider`.
pub async fn create_embedder(settings: &Settings) -> anyhow::Result<DynEmbedder> {
    match settings.embedding.provider {
        EmbeddingProvider::Openai => Ok(Arc::new(OpenAiEmbedder::from_settings(settings)?)),
        #[cfg(feature = "fastembed")]
        EmbeddingProvider::Fastembed => Ok(Arc::new(FastEmbedder::new().await?)),
        #[cfg(not(feature = "fastembed"))]
        EmbeddingProvider::Fastembed => Err(anyhow::anyhow!(
            "embedding.provider = \"fastembed\" requires building with the `fastembed` feature"
        )),
    }
}
