use async_trait::async_trait;
use futures::future::join_all;
use graph_flow::{Context, NextAction, Task, TaskResult};
use tracing::{debug, instrument};

use super::prompts::{build_synthesis_messages, classification_schema, classify_messages};
use super::state::{
    ANSWER_KEY, CLASSIFICATIONS_KEY, Classification, ClassificationOutput, MODEL_ID_KEY,
    QUERY_KEY, RESULTS_KEY, RetrievalResult, TEMPERATURE_KEY,
};
use crate::graphs::task_error;
use crate::llm::{CompletionRequest, DynLanguageModel, complete_structured};
use crate::retrieval::FilteredRetriever;
use crate::streaming::StreamHub;

pub const CLASSIFY_TASK: &str = "classify";
pub const RETRIEVE_TASK: &str = "retrieve";
pub const SYNTHESIZE_TASK: &str = "synthesize";

/// Routes the query to one or both sources with rewritten sub-queries.
pub struct ClassifyTask {
    model: DynLanguageModel,
    model_id: String,
    temperature: f32,
}

impl ClassifyTask {
    pub fn new(model: DynLanguageModel, model_id: impl Into<String>, temperature: f32) -> Self {
        Self {
            model,
            model_id: model_id.into(),
            temperature,
        }
    }
}

#[async_trait]
impl Task for ClassifyTask {
    fn id(&self) -> &str {
        CLASSIFY_TASK
    }

    #[instrument(name = "task.classify", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query: String = context.get(QUERY_KEY).await.unwrap_or_default();

        let request = CompletionRequest::new(
            self.model_id.clone(),
            self.temperature,
            classify_messages(&query),
        );
        let output: ClassificationOutput = complete_structured(
            self.model.as_ref(),
            request,
            "ClassificationResult",
            classification_schema(),
        )
        .await
        .map_err(task_error)?;

        let classifications = output.classifications;
        debug!(
            sources = ?classifications.iter().map(|c| c.source.doc_type()).collect::<Vec<_>>(),
            sub_queries = ?classifications
                .iter()
                .map(|c| (c.source.doc_type(), c.query.as_str()))
                .collect::<Vec<_>>(),
            "classification_result"
        );

        context.set(CLASSIFICATIONS_KEY, &classifications).await;
        if classifications.is_empty() {
            // Nothing to search, so the run ends without an answer.
            context.set(RESULTS_KEY, Vec::<RetrievalResult>::new()).await;
            context.set(ANSWER_KEY, String::new()).await;
            return Ok(TaskResult::new(None, NextAction::End));
        }
        Ok(TaskResult::new(None, NextAction::ContinueAndExecute))
    }
}

/// One filtered search per classification, all in flight at once.
pub struct RetrieveTask {
    retriever: FilteredRetriever,
}

impl RetrieveTask {
    pub fn new(retriever: FilteredRetriever) -> Self {
        Self { retriever }
    }

    async fn retrieve_one(&self, classification: &Classification) -> anyhow::Result<RetrievalResult> {
        let doc_type = classification.source.doc_type();
        debug!(doc_type, query = %classification.query, "retrieval_query");

        let scored = self
            .retriever
            .retrieve_relevant(&classification.query, Some(doc_type))
            .await?;

        debug!(
            doc_type,
            num_chunks = scored.len(),
            pages = ?scored.iter().map(|(doc, _)| doc.page_label()).collect::<Vec<_>>(),
            distances = ?scored
                .iter()
                .map(|(_, distance)| (distance * 1000.0).round() / 1000.0)
                .collect::<Vec<_>>(),
            "retrieval_results"
        );

        Ok(RetrievalResult {
            source: classification.source,
            documents: scored.into_iter().map(|(doc, _)| doc).collect(),
        })
    }
}

#[async_trait]
impl Task for RetrieveTask {
    fn id(&self) -> &str {
        RETRIEVE_TASK
    }

    #[instrument(name = "task.retrieve", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let classifications: Vec<Classification> =
            context.get(CLASSIFICATIONS_KEY).await.unwrap_or_default();

        let outcomes = join_all(classifications.iter().map(|c| self.retrieve_one(c))).await;

        let mut results: Vec<RetrievalResult> = context.get(RESULTS_KEY).await.unwrap_or_default();
        for outcome in outcomes {
            results.push(outcome.map_err(task_error)?);
        }

        context.set(RESULTS_KEY, &results).await;
        Ok(TaskResult::new(None, NextAction::ContinueAndExecute))
    }
}

/// Writes the cited answer, streaming tokens to the run's stream if any.
pub struct SynthesizeTask {
    model: DynLanguageModel,
    hub: StreamHub,
    default_model_id: String,
    default_temperature: f32,
}

impl SynthesizeTask {
    pub fn new(
        model: DynLanguageModel,
        hub: StreamHub,
        default_model_id: impl Into<String>,
        default_temperature: f32,
    ) -> Self {
        Self {
            model,
            hub,
            default_model_id: default_model_id.into(),
            default_temperature,
        }
    }
}

#[async_trait]
impl Task for SynthesizeTask {
    fn id(&self) -> &str {
        SYNTHESIZE_TASK
    }

    #[instrument(name = "task.synthesize", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query: String = context.get(QUERY_KEY).await.unwrap_or_default();
        let results: Vec<RetrievalResult> = context.get(RESULTS_KEY).await.unwrap_or_default();
        let model_id: String = context
            .get(MODEL_ID_KEY)
            .await
            .unwrap_or_else(|| self.default_model_id.clone());
        let temperature: f32 = context
            .get(TEMPERATURE_KEY)
            .await
            .unwrap_or(self.default_temperature);

        debug!(
            query = %query,
            chunks = results.iter().map(|r| r.documents.len()).sum::<usize>(),
            "synthesis_input"
        );

        let request =
            CompletionRequest::new(model_id, temperature, build_synthesis_messages(&query, &results));
        let sink = self.hub.sink_for(&context);
        let turn = self
            .model
            .complete_streaming(request, &sink)
            .await
            .map_err(task_error)?;

        debug!(
            answer_preview = %turn.content.chars().take(200).collect::<String>(),
            "synthesis_output"
        );

        context.set(ANSWER_KEY, turn.content).await;
        Ok(TaskResult::new(None, NextAction::End))
    }
}
