use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

use super::{MetadataFilter, VectorStore};
use crate::documents::Document;
use crate::embeddings::DynEmbedder;

const KEY_CONTENT: &str = "page_content";
const KEY_METADATA: &str = "metadata";

#[derive(Clone, Debug)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub concurrency_limit: usize,
}

/// Qdrant-backed index; metadata is nested under `metadata.*` in the payload.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    semaphore: Arc<Semaphore>,
    embedder: DynEmbedder,
}

impl QdrantVectorStore {
    pub fn new(config: QdrantConfig, embedder: DynEmbedder) -> anyhow::Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .build()
            .map_err(|err| anyhow!("failed to create Qdrant client: {err}"))?;

        Ok(Self {
            client,
            collection: config.collection,
            semaphore: Arc::new(Semaphore::new(config.concurrency_limit.max(1))),
            embedder,
        })
    }
}

async fn ensure_collection(
    client: &Qdrant,
    collection: &str,
    dimension: usize,
) -> anyhow::Result<()> {
    if client.collection_exists(collection).await? {
        return Ok(());
    }

    client
        .create_collection(
            CreateCollectionBuilder::new(collection)
                .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
        )
        .await
        .map_err(|err| anyhow!("failed to create qdrant collection '{collection}': {err}"))?;
    info!(collection, dimension, "created qdrant collection");
    Ok(())
}

fn build_payload(doc: &Document) -> anyhow::Result<qdrant_client::Payload> {
    let payload = serde_json::json!({
        KEY_CONTENT: doc.page_content,
        KEY_METADATA: doc.metadata,
    });

    payload
        .try_into()
        .map_err(|err| anyhow!("failed to convert payload: {err}"))
}

fn document_from_payload(payload: HashMap<String, qdrant_client::qdrant::Value>) -> Document {
    let mut map: HashMap<String, Value> = payload
        .into_iter()
        .map(|(key, value)| (key, value.into_json()))
        .collect();
    let page_content = map
        .remove(KEY_CONTENT)
        .and_then(|value| value.as_str().map(|s| s.to_string()))
        .unwrap_or_default();
    let metadata = match map.remove(KEY_METADATA) {
        Some(Value::Object(metadata)) => metadata,
        _ => Map::new(),
    };
    Document {
        page_content,
        metadata,
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn add_documents(&self, docs: Vec<Document>) -> anyhow::Result<Vec<String>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("semaphore closed unexpectedly")?;

        let texts = docs.iter().map(|doc| doc.page_content.clone()).collect();
        let embeddings = self.embedder.embed_documents(texts).await?;
        let dimension = embeddings
            .first()
            .map(|vector| vector.len())
            .ok_or_else(|| anyhow!("embedder returned no vectors"))?;
        ensure_collection(&self.client, &self.collection, dimension).await?;

        let mut ids = Vec::with_capacity(docs.len());
        let mut points = Vec::with_capacity(docs.len());
        for (doc, vector) in docs.iter().zip(embeddings) {
            let id = Uuid::new_v4().to_string();
            points.push(PointStruct::new(id.clone(), vector, build_payload(doc)?));
            ids.push(id);
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|err| anyhow!("failed to upsert documents into qdrant: {err}"))?;

        debug!(collection = %self.collection, count = ids.len(), "upserted documents into qdrant");
        Ok(ids)
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<(Document, f32)>> {
        if k == 0 || !self.client.collection_exists(&self.collection).await? {
            return Ok(Vec::new());
        }

        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("semaphore closed unexpectedly")?;

        let query_embedding = self.embedder.embed_query(query).await?;
        let mut request = SearchPointsBuilder::new(&self.collection, query_embedding, k as u64)
            .with_payload(true);
        if let Some(filter) = filter {
            request = request.filter(Filter::all([Condition::matches(
                format!("{KEY_METADATA}.{}", filter.key),
                filter.value.clone(),
            )]));
        }

        let search = self
            .client
            .search_points(request)
            .await
            .map_err(|err| anyhow!("qdrant search failed: {err}"))?;

        // Qdrant reports cosine similarity; convert to distance so lower is closer.
        Ok(search
            .result
            .into_iter()
            .map(|point| (document_from_payload(point.payload), 1.0 - point.score))
            .collect())
    }
}
