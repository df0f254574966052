//! Similarity search with an optional document-type filter and distance cutoff.

use tracing::debug;

use crate::documents::Document;
use crate::metrics;
use crate::vectorstore::{DynVectorStore, MetadataFilter};

/// `doc_type` value meaning "search every document".
pub const ALL_DOCUMENTS: &str = "both";

#[derive(Clone)]
pub struct FilteredRetriever {
    store: DynVectorStore,
    k: usize,
    max_distance: Option<f32>,
}

impl FilteredRetriever {
    pub fn new(store: DynVectorStore, k: usize, max_distance: Option<f32>) -> Self {
        Self {
            store,
            k,
            max_distance,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn max_distance(&self) -> Option<f32> {
        self.max_distance
    }

    /// Documents only, after the distance cutoff.
    pub async fn retrieve(
        &self,
        query: &str,
        doc_type: Option<&str>,
    ) -> anyhow::Result<Vec<Document>> {
        Ok(self
            .retrieve_relevant(query, doc_type)
            .await?
            .into_iter()
            .map(|(doc, _)| doc)
            .collect())
    }

    /// Raw scored results; the cutoff is not applied.
    pub async fn retrieve_with_scores(
        &self,
        query: &str,
        doc_type: Option<&str>,
    ) -> anyhow::Result<Vec<(Document, f32)>> {
        let filter = doc_type_filter(doc_type);
        let results = self
            .store
            .similarity_search_with_score(query, self.k, filter.as_ref())
            .await?;
        metrics::record_retrieval(doc_type.unwrap_or(ALL_DOCUMENTS), results.len());
        Ok(results)
    }

    /// Scored results with anything farther than `max_distance` dropped.
    pub async fn retrieve_relevant(
        &self,
        query: &str,
        doc_type: Option<&str>,
    ) -> anyhow::Result<Vec<(Document, f32)>> {
        let results = self.retrieve_with_scores(query, doc_type).await?;
        let Some(max_distance) = self.max_distance else {
            return Ok(results);
        };

        let before = results.len();
        let kept: Vec<_> = results
            .into_iter()
            .filter(|(_, distance)| *distance <= max_distance)
            .collect();
        if kept.len() < before {
            debug!(
                max_distance,
                dropped = before - kept.len(),
                kept = kept.len(),
                "distance threshold filtered results"
            );
        }
        Ok(kept)
    }
}

fn doc_type_filter(doc_type: Option<&str>) -> Option<MetadataFilter> {
    match doc_type {
        None | Some(ALL_DOCUMENTS) => None,
        Some(value) => Some(MetadataFilter::doc_type(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectorstore::VectorStore;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Returns canned hits and records the filter it was asked for.
    struct CannedStore {
        hits: Vec<(Document, f32)>,
        seen_filter: Mutex<Option<MetadataFilter>>,
    }

    #[async_trait]
    impl VectorStore for CannedStore {
        async fn add_documents(&self, _docs: Vec<Document>) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn similarity_search_with_score(
            &self,
            _query: &str,
            k: usize,
            filter: Option<&MetadataFilter>,
        ) -> anyhow::Result<Vec<(Document, f32)>> {
            *self.seen_filter.lock().unwrap() = filter.cloned();
            Ok(self.hits.iter().take(k).cloned().collect())
        }
    }

    fn store() -> Arc<CannedStore> {
        Arc::new(CannedStore {
            hits: vec![
                (Document::new("close"), 0.1),
                (Document::new("medium"), 0.4),
                (Document::new("far"), 0.9),
            ],
            seen_filter: Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn both_disables_filter() {
        let store = store();
        let retriever = FilteredRetriever::new(store.clone(), 10, None);

        retriever.retrieve("q", Some("both")).await.unwrap();
        assert!(store.seen_filter.lock().unwrap().is_none());

        retriever.retrieve("q", Some("forecast")).await.unwrap();
        assert_eq!(
            store.seen_filter.lock().unwrap().clone(),
            Some(MetadataFilter::doc_type("forecast"))
        );
    }

    #[tokio::test]
    async fn threshold_applies_to_relevant_but_not_raw_scores() {
        let retriever = FilteredRetriever::new(store(), 10, Some(0.5));

        let relevant = retriever.retrieve_relevant("q", None).await.unwrap();
        assert_eq!(relevant.len(), 2);

        let raw = retriever.retrieve_with_scores("q", None).await.unwrap();
        assert_eq!(raw.len(), 3);

        let docs = retriever.retrieve("q", None).await.unwrap();
        let texts: Vec<_> = docs.iter().map(|d| d.page_content.as_str()).collect();
        assert_eq!(texts, ["close", "medium"]);
    }

    #[tokio::test]
    async fn k_limits_results() {
        let retriever = FilteredRetriever::new(store(), 1, None);
        assert_eq!(retriever.retrieve("q", None).await.unwrap().len(), 1);
    }
}
