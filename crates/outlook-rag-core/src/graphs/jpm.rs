//! `jpm_react_agent`: the conversational agent with the document search tool.

use std::sync::Arc;

use graph_flow::SessionStorage;

use super::AGENT_GRAPH_NAME;
use super::agent::{AgentConfig, AgentRunner, Tool};
use super::rag::{RagRunner, SearchDocumentsTool};
use crate::checkpoint::create_checkpointer;
use crate::config::Settings;
use crate::llm::{DynLanguageModel, load_chat_model};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant for analyzing J.P. Morgan investment documents.

Use the search_jpm_documents tool when you need information about:
- 2025 market predictions and investment themes
- Mid-year 2025 performance and results
- Stock analysis and portfolio recommendations

For greetings, clarifications, or questions about previous responses, respond directly.
Always cite sources when providing financial information.";

/// Assemble the agent around an existing RAG runner.
pub fn jpm_react_agent(
    rag: RagRunner,
    model: DynLanguageModel,
    config: AgentConfig,
    storage: Arc<dyn SessionStorage>,
) -> AgentRunner {
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(SearchDocumentsTool::new(rag))];
    AgentRunner::new(
        AGENT_GRAPH_NAME,
        model,
        tools,
        config.with_system_prompt(SYSTEM_PROMPT),
        storage,
    )
}

pub async fn build_jpm_react_agent(settings: &Settings) -> anyhow::Result<AgentRunner> {
    let rag = RagRunner::from_settings(settings).await?;
    let model = load_chat_model(settings)?;
    let storage = create_checkpointer(&settings.checkpointer).await?;
    Ok(jpm_react_agent(
        rag,
        model,
        AgentConfig::from_settings(settings),
        storage,
    ))
}
