use graph_flow::Context;

use crate::llm::ChatMessage;

pub(crate) const MESSAGES_KEY: &str = "agent.messages";
pub(crate) const TOOL_CALLED_KEY: &str = "agent.tool_called";
pub(crate) const STEPS_KEY: &str = "agent.steps";
pub(crate) const MODEL_ID_KEY: &str = "agent.model_id";
pub(crate) const TEMPERATURE_KEY: &str = "agent.temperature";

/// Conversation state persisted per thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentState {
    pub messages: Vec<ChatMessage>,
    /// Set once any tool call was requested; disables forced tool choice.
    pub tool_called: bool,
    /// Model calls made during the current turn.
    pub steps: usize,
}

impl AgentState {
    pub async fn load(context: &Context) -> Self {
        Self {
            messages: context.get(MESSAGES_KEY).await.unwrap_or_default(),
            tool_called: context.get(TOOL_CALLED_KEY).await.unwrap_or(false),
            steps: context.get(STEPS_KEY).await.unwrap_or(0),
        }
    }

    pub async fn store(&self, context: &Context) {
        context.set(MESSAGES_KEY, &self.messages).await;
        context.set(TOOL_CALLED_KEY, self.tool_called).await;
        context.set(STEPS_KEY, self.steps).await;
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}
