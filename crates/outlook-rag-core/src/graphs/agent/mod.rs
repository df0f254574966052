//! Tool-calling conversational agent with per-thread checkpointing.
//!
//! The graph alternates between the `agent` task (one model call) and the
//! `tools` task until the model answers without tool calls. Conversation state
//! lives in the session context, and the session is stored under the thread id,
//! so the configured `SessionStorage` acts as the checkpointer.

mod state;
mod tasks;

pub use state::AgentState;
pub use tasks::{AGENT_TASK, CallModelTask, STEP_LIMIT_MESSAGE, TOOLS_TASK, ToolsTask};

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use graph_flow::{FlowRunner, Graph, GraphBuilder, Session, SessionStorage};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::run_to_completion;
use super::runner::{ChatRequest, ChatResponse, GraphRunner, TokenStream, stream_run};
use crate::config::Settings;
use crate::llm::{ChatMessage, DynLanguageModel, ToolSpec};
use crate::metrics;
use crate::streaming::{STREAM_ID_KEY, StreamHub};

/// A capability the agent may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Run the tool; the output becomes the tool message content.
    async fn call(&self, arguments: Value) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model_id: String,
    pub temperature: f32,
    pub system_prompt: String,
    /// Force this tool on the first model call, binding only it.
    pub tool_choice: Option<String>,
    /// Model calls allowed per turn.
    pub max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            temperature: 0.0,
            system_prompt: "You are a helpful assistant.".to_string(),
            tool_choice: None,
            max_steps: 25,
        }
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model_id: settings.llm.model_id.clone(),
            temperature: settings.llm.default_temperature,
            max_steps: settings.graph.agent_max_steps.max(1),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tool_choice(mut self, tool: impl Into<String>) -> Self {
        self.tool_choice = Some(tool.into());
        self
    }
}

fn build_graph(
    name: &str,
    model: DynLanguageModel,
    tools: Vec<Arc<dyn Tool>>,
    config: AgentConfig,
    hub: StreamHub,
) -> Arc<Graph> {
    let tools = Arc::new(tools);
    let agent = Arc::new(CallModelTask::new(model, tools.clone(), config, hub));
    let tool_runner = Arc::new(ToolsTask::new(tools));

    let graph = GraphBuilder::new(name)
        .add_task(agent)
        .add_task(tool_runner)
        .add_edge(AGENT_TASK, TOOLS_TASK)
        .add_edge(TOOLS_TASK, AGENT_TASK)
        .set_start_task(AGENT_TASK)
        .build();

    Arc::new(graph)
}

/// Keep user and assistant turns; anything else in a request is ignored.
fn parse_messages(request: &ChatRequest) -> Vec<ChatMessage> {
    request
        .messages
        .iter()
        .filter_map(|message| match message.role.as_str() {
            "user" => Some(ChatMessage::user(message.content.clone())),
            "assistant" | "ai" => Some(ChatMessage::assistant(message.content.clone())),
            _ => None,
        })
        .collect()
}

#[derive(Clone)]
pub struct AgentRunner {
    name: String,
    graph: Arc<Graph>,
    storage: Arc<dyn SessionStorage>,
    hub: StreamHub,
    config: AgentConfig,
    thread_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AgentRunner {
    pub fn new(
        name: impl Into<String>,
        model: DynLanguageModel,
        tools: Vec<Arc<dyn Tool>>,
        config: AgentConfig,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        let name = name.into();
        let hub = StreamHub::new();
        Self {
            graph: build_graph(&name, model, tools, config.clone(), hub.clone()),
            name,
            storage,
            hub,
            config,
            thread_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Stored conversation for `thread_id`, empty if the thread is new.
    pub async fn history(&self, thread_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let session = self
            .storage
            .get(thread_id)
            .await
            .map_err(|err| anyhow!("failed to load thread {thread_id}: {err}"))?;
        Ok(match session {
            Some(session) => AgentState::load(&session.context).await.messages,
            None => Vec::new(),
        })
    }

    /// Append the request to the thread and run the agent until it answers.
    #[instrument(name = "agent.turn", skip(self, request, stream_id), fields(graph = %self.name))]
    async fn run_turn(
        &self,
        request: &ChatRequest,
        thread_id: &str,
        stream_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let lock = self
            .thread_locks
            .entry(thread_id.to_string())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.run_locked(request, thread_id, stream_id).await
        };
        drop(lock);
        // The map holds the last reference once no other turn is waiting.
        self.thread_locks
            .remove_if(thread_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn run_locked(
        &self,
        request: &ChatRequest,
        thread_id: &str,
        stream_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let existing = self
            .storage
            .get(thread_id)
            .await
            .map_err(|err| anyhow!("failed to load thread {thread_id}: {err}"))?;
        let mut session = existing
            .unwrap_or_else(|| Session::new_from_task(thread_id.to_string(), AGENT_TASK));
        session.current_task_id = AGENT_TASK.to_string();

        let mut state = AgentState::load(&session.context).await;
        state.messages.extend(parse_messages(request));
        state.steps = 0;
        state.store(&session.context).await;

        let model_id = if request.model_id.is_empty() {
            self.config.model_id.clone()
        } else {
            request.model_id.clone()
        };
        session.context.set(state::MODEL_ID_KEY, model_id).await;
        session
            .context
            .set(state::TEMPERATURE_KEY, request.temperature)
            .await;
        session
            .context
            .set(STREAM_ID_KEY, stream_id.map(str::to_string))
            .await;

        self.storage
            .save(session)
            .await
            .map_err(|err| anyhow!("failed to persist thread {thread_id}: {err}"))?;

        let runner = FlowRunner::new(self.graph.clone(), self.storage.clone());
        run_to_completion(&runner, thread_id).await?;

        let session = self
            .storage
            .get(thread_id)
            .await
            .map_err(|err| anyhow!("failed to reload thread {thread_id}: {err}"))?
            .ok_or_else(|| anyhow!("thread {thread_id} missing after execution"))?;
        let state = AgentState::load(&session.context).await;
        debug!(
            steps = state.steps,
            messages = state.messages.len(),
            "agent turn completed"
        );

        state
            .last_message()
            .map(|message| message.content.clone())
            .ok_or_else(|| anyhow!("agent produced no messages"))
    }

    async fn answer(
        &self,
        request: &ChatRequest,
        thread_id: &str,
        stream_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let started = Instant::now();
        let result = self.run_turn(request, thread_id, stream_id).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::record_graph_run(&self.name, status, started.elapsed().as_millis() as u64);
        result
    }
}

#[async_trait]
impl GraphRunner for AgentRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: ChatRequest, thread_id: &str) -> anyhow::Result<ChatResponse> {
        let content = self.answer(&request, thread_id, None).await?;
        Ok(ChatResponse { content })
    }

    async fn stream(&self, request: ChatRequest, thread_id: &str) -> anyhow::Result<TokenStream> {
        let runner = self.clone();
        let thread_id = thread_id.to_string();
        Ok(stream_run(&self.hub, move |stream_id| async move {
            runner
                .answer(&request, &thread_id, Some(&stream_id))
                .await
                .map(|_| ())
        }))
    }
}
