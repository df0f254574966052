use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use graph_flow::{Context, NextAction, Task, TaskResult};
use tracing::{debug, instrument, warn};

use super::state::{AgentState, MODEL_ID_KEY, TEMPERATURE_KEY};
use super::{AgentConfig, Tool};
use crate::graphs::task_error;
use crate::llm::{ChatMessage, CompletionRequest, DynLanguageModel, Role, ToolCall, ToolChoice};
use crate::streaming::{StreamHub, TokenSink};

pub const AGENT_TASK: &str = "agent";
pub const TOOLS_TASK: &str = "tools";

pub const STEP_LIMIT_MESSAGE: &str = "I couldn't complete the request in the available steps.";

/// Calls the model with the conversation and routes to tools or ends the turn.
pub struct CallModelTask {
    model: DynLanguageModel,
    tools: Arc<Vec<Arc<dyn Tool>>>,
    config: AgentConfig,
    hub: StreamHub,
}

impl CallModelTask {
    pub fn new(
        model: DynLanguageModel,
        tools: Arc<Vec<Arc<dyn Tool>>>,
        config: AgentConfig,
        hub: StreamHub,
    ) -> Self {
        Self {
            model,
            tools,
            config,
            hub,
        }
    }

    fn bind_tools(&self, request: CompletionRequest, tool_called: bool) -> CompletionRequest {
        if self.tools.is_empty() {
            return request;
        }
        match self.config.tool_choice.as_deref() {
            Some(forced) if !tool_called => {
                let bound = self
                    .tools
                    .iter()
                    .map(|tool| tool.spec())
                    .filter(|spec| spec.name == forced)
                    .collect();
                request
                    .with_tools(bound)
                    .with_tool_choice(ToolChoice::Function(forced.to_string()))
            }
            _ => request.with_tools(self.tools.iter().map(|tool| tool.spec()).collect()),
        }
    }
}

#[async_trait]
impl Task for CallModelTask {
    fn id(&self) -> &str {
        AGENT_TASK
    }

    #[instrument(name = "task.agent", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let mut state = AgentState::load(&context).await;
        let model_id: String = context
            .get(MODEL_ID_KEY)
            .await
            .unwrap_or_else(|| self.config.model_id.clone());
        let temperature: f32 = context
            .get(TEMPERATURE_KEY)
            .await
            .unwrap_or(self.config.temperature);

        let is_last_step = state.steps + 1 >= self.config.max_steps;

        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        messages.push(ChatMessage::system(self.config.system_prompt.clone()));
        messages.extend(state.messages.iter().cloned());

        let request = self.bind_tools(
            CompletionRequest::new(model_id, temperature, messages),
            state.tool_called,
        );
        let sink = self.hub.sink_for(&context);
        // The last step may be replaced by the limit message, so its tokens
        // are held back until the outcome is known.
        let live = if is_last_step {
            TokenSink::disabled()
        } else {
            sink.clone()
        };
        let turn = self
            .model
            .complete_streaming(request, &live)
            .await
            .map_err(task_error)?;
        state.steps += 1;

        let next = if turn.wants_tools() && is_last_step {
            warn!(steps = state.steps, "agent step limit reached with pending tool calls");
            sink.push(STEP_LIMIT_MESSAGE);
            state.messages.push(ChatMessage::assistant(STEP_LIMIT_MESSAGE));
            NextAction::End
        } else if turn.wants_tools() {
            debug!(
                tools = ?turn.tool_calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>(),
                "agent requested tools"
            );
            state.tool_called = true;
            state.messages.push(turn.into_message());
            NextAction::ContinueAndExecute
        } else {
            if is_last_step {
                sink.push(&turn.content);
            }
            state.messages.push(turn.into_message());
            NextAction::End
        };

        state.store(&context).await;
        Ok(TaskResult::new(None, next))
    }
}

/// Executes the tool calls of the last assistant message.
pub struct ToolsTask {
    tools: Arc<Vec<Arc<dyn Tool>>>,
}

impl ToolsTask {
    pub fn new(tools: Arc<Vec<Arc<dyn Tool>>>) -> Self {
        Self { tools }
    }

    async fn execute(&self, call: &ToolCall) -> ChatMessage {
        let Some(tool) = self.tools.iter().find(|tool| tool.spec().name == call.name) else {
            let available: Vec<String> = self.tools.iter().map(|tool| tool.spec().name).collect();
            return ChatMessage::tool(
                call.id.clone(),
                format!(
                    "Error: {} is not a valid tool, try one of [{}].",
                    call.name,
                    available.join(", ")
                ),
            );
        };

        match tool.call(call.arguments.clone()).await {
            Ok(output) => ChatMessage::tool(call.id.clone(), output),
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool call failed");
                ChatMessage::tool(
                    call.id.clone(),
                    format!("Error: {err}\n Please fix your mistakes."),
                )
            }
        }
    }
}

#[async_trait]
impl Task for ToolsTask {
    fn id(&self) -> &str {
        TOOLS_TASK
    }

    #[instrument(name = "task.tools", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let mut state = AgentState::load(&context).await;
        let calls = match state.last_message() {
            Some(message) if message.role == Role::Assistant => message.tool_calls.clone(),
            _ => {
                return Err(task_error("tools step expected an assistant message with tool calls"));
            }
        };

        let outputs = join_all(calls.iter().map(|call| self.execute(call))).await;
        debug!(count = outputs.len(), "tool calls completed");
        state.messages.extend(outputs);

        state.store(&context).await;
        Ok(TaskResult::new(None, NextAction::ContinueAndExecute))
    }
}
