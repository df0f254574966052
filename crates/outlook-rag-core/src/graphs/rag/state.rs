use std::fmt;

use graph_flow::Context;
use serde::{Deserialize, Serialize};

use crate::documents::Document;

pub(crate) const QUERY_KEY: &str = "rag.query";
pub(crate) const CLASSIFICATIONS_KEY: &str = "rag.classifications";
pub(crate) const RESULTS_KEY: &str = "rag.results";
pub(crate) const ANSWER_KEY: &str = "rag.answer";
pub(crate) const MODEL_ID_KEY: &str = "rag.model_id";
pub(crate) const TEMPERATURE_KEY: &str = "rag.temperature";

/// Which outlook document a sub-query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Forecast,
    MidYear,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Forecast, Source::MidYear];

    /// Value of the `doc_type` metadata field for this source.
    pub fn doc_type(&self) -> &'static str {
        match self {
            Source::Forecast => "forecast",
            Source::MidYear => "mid_year",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Forecast => "Outlook 2025",
            Source::MidYear => "Mid-Year Outlook",
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Source::Forecast => "## Outlook 2025 (Predictions)",
            Source::MidYear => "## Mid-Year Outlook 2025 (Actual Results)",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.doc_type())
    }
}

/// Routing decision: search `source` with a retrieval-optimised `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub source: Source,
    pub query: String,
}

impl Classification {
    pub fn new(source: Source, query: impl Into<String>) -> Self {
        Self {
            source,
            query: query.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ClassificationOutput {
    pub classifications: Vec<Classification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub source: Source,
    pub documents: Vec<Document>,
}

/// Final state of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RagOutcome {
    pub query: String,
    pub classifications: Vec<Classification>,
    pub results: Vec<RetrievalResult>,
    pub answer: String,
}

impl RagOutcome {
    pub(crate) async fn from_context(context: &Context) -> Self {
        Self {
            query: context.get(QUERY_KEY).await.unwrap_or_default(),
            classifications: context.get(CLASSIFICATIONS_KEY).await.unwrap_or_default(),
            results: context.get(RESULTS_KEY).await.unwrap_or_default(),
            answer: context.get(ANSWER_KEY).await.unwrap_or_default(),
        }
    }

    /// All documents retrieved for `source`, across results.
    pub fn documents_for(&self, source: Source) -> Vec<&Document> {
        self.results
            .iter()
            .filter(|result| result.source == source)
            .flat_map(|result| result.documents.iter())
            .collect()
    }
}
