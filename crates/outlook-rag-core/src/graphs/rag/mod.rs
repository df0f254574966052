//! Classify → retrieve → synthesize pipeline over the two outlook documents.

mod prompts;
mod state;
mod tasks;
mod tool;

pub use prompts::{
    CLASSIFY_SYSTEM, SYNTHESIS_SYSTEM, build_synthesis_messages, classification_schema,
    format_documents,
};
pub use state::{Classification, RagOutcome, RetrievalResult, Source};
pub use tasks::{
    CLASSIFY_TASK, ClassifyTask, RETRIEVE_TASK, RetrieveTask, SYNTHESIZE_TASK, SynthesizeTask,
};
pub use tool::{SEARCH_TOOL_NAME, SearchDocumentsTool};

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use graph_flow::{FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session, SessionStorage};
use tracing::{info, instrument};
use uuid::Uuid;

use super::runner::{ChatRequest, ChatResponse, GraphRunner, TokenStream, stream_run};
use super::{RAG_GRAPH_NAME, run_to_completion};
use crate::config::Settings;
use crate::embeddings::create_embedder;
use crate::llm::{DynLanguageModel, load_chat_model};
use crate::metrics;
use crate::retrieval::FilteredRetriever;
use crate::streaming::{STREAM_ID_KEY, StreamHub};
use crate::vectorstore::create_vectorstore;

/// Models and sampling used by the pipeline when a request does not override them.
#[derive(Debug, Clone)]
pub struct RagOptions {
    pub model_id: String,
    pub temperature: f32,
    pub router_model_id: String,
    pub classification_temperature: f32,
}

impl RagOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model_id: settings.llm.model_id.clone(),
            temperature: settings.llm.default_temperature,
            router_model_id: settings.llm.router_model_id.clone(),
            classification_temperature: 0.0,
        }
    }
}

fn build_graph(
    model: DynLanguageModel,
    retriever: FilteredRetriever,
    hub: StreamHub,
    options: &RagOptions,
) -> Arc<Graph> {
    let classify = Arc::new(ClassifyTask::new(
        model.clone(),
        options.router_model_id.clone(),
        options.classification_temperature,
    ));
    let retrieve = Arc::new(RetrieveTask::new(retriever));
    let synthesize = Arc::new(SynthesizeTask::new(
        model,
        hub,
        options.model_id.clone(),
        options.temperature,
    ));

    let graph = GraphBuilder::new(RAG_GRAPH_NAME)
        .add_task(classify)
        .add_task(retrieve)
        .add_task(synthesize)
        .add_edge(CLASSIFY_TASK, RETRIEVE_TASK)
        .add_edge(RETRIEVE_TASK, SYNTHESIZE_TASK)
        .set_start_task(CLASSIFY_TASK)
        .build();

    Arc::new(graph)
}

/// Stateless runner: every call is a fresh session and `thread_id` is ignored.
#[derive(Clone)]
pub struct RagRunner {
    graph: Arc<Graph>,
    hub: StreamHub,
    options: RagOptions,
}

impl RagRunner {
    pub fn new(model: DynLanguageModel, retriever: FilteredRetriever, options: RagOptions) -> Self {
        let hub = StreamHub::new();
        Self {
            graph: build_graph(model, retriever, hub.clone(), &options),
            hub,
            options,
        }
    }

    /// Wire the runner from configuration: embedder, index, retriever and chat model.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let embedder = create_embedder(settings).await?;
        let store = create_vectorstore(settings, embedder).await?;
        let retriever = FilteredRetriever::new(
            store,
            settings.retrieval.k,
            settings.retrieval.max_distance,
        );
        let model = load_chat_model(settings)?;
        Ok(Self::new(model, retriever, RagOptions::from_settings(settings)))
    }

    pub fn options(&self) -> &RagOptions {
        &self.options
    }

    /// Run the pipeline for one query and return its final state.
    #[instrument(name = "rag.run", skip(self, model_id, temperature, stream_id))]
    pub async fn run_query(
        &self,
        query: &str,
        model_id: Option<&str>,
        temperature: Option<f32>,
        stream_id: Option<&str>,
    ) -> anyhow::Result<RagOutcome> {
        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(self.graph.clone(), storage.clone());

        let session_id = Uuid::new_v4().to_string();
        let session = Session::new_from_task(session_id.clone(), CLASSIFY_TASK);
        session.context.set(state::QUERY_KEY, query.to_string()).await;
        session
            .context
            .set(
                state::MODEL_ID_KEY,
                model_id.unwrap_or(self.options.model_id.as_str()).to_string(),
            )
            .await;
        session
            .context
            .set(
                state::TEMPERATURE_KEY,
                temperature.unwrap_or(self.options.temperature),
            )
            .await;
        if let Some(stream_id) = stream_id {
            session.context.set(STREAM_ID_KEY, stream_id.to_string()).await;
        }

        storage
            .save(session)
            .await
            .map_err(|err| anyhow!("failed to persist session: {err}"))?;

        run_to_completion(&runner, &session_id).await?;

        let session = storage
            .get(&session_id)
            .await
            .map_err(|err| anyhow!("failed to reload session: {err}"))?
            .ok_or_else(|| anyhow!("session missing after execution"))?;

        let outcome = RagOutcome::from_context(&session.context).await;
        info!(
            sources = outcome.classifications.len(),
            documents = outcome.results.iter().map(|r| r.documents.len()).sum::<usize>(),
            "rag pipeline completed"
        );
        Ok(outcome)
    }

    async fn answer(&self, request: &ChatRequest, stream_id: Option<&str>) -> anyhow::Result<String> {
        let started = Instant::now();
        let result = self
            .run_query(
                request.last_user_message(),
                Some(request.model_id.as_str()),
                Some(request.temperature),
                stream_id,
            )
            .await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::record_graph_run(RAG_GRAPH_NAME, status, started.elapsed().as_millis() as u64);
        Ok(result?.answer)
    }
}

#[async_trait]
impl GraphRunner for RagRunner {
    fn name(&self) -> &str {
        RAG_GRAPH_NAME
    }

    async fn invoke(&self, request: ChatRequest, _thread_id: &str) -> anyhow::Result<ChatResponse> {
        let content = self.answer(&request, None).await?;
        Ok(ChatResponse { content })
    }

    async fn stream(&self, request: ChatRequest, _thread_id: &str) -> anyhow::Result<TokenStream> {
        let runner = self.clone();
        Ok(stream_run(&self.hub, move |stream_id| async move {
            runner.answer(&request, Some(&stream_id)).await.map(|_| ())
        }))
    }
}
