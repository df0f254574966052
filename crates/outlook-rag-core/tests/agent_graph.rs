mod common;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use common::{ScriptedModel, classification, outlook_store, text, tool_call};
use futures::StreamExt;
use graph_flow::InMemorySessionStorage;
use outlook_rag_core::graphs::agent::{AgentConfig, AgentRunner, STEP_LIMIT_MESSAGE, Tool};
use outlook_rag_core::graphs::jpm::{SYSTEM_PROMPT, jpm_react_agent};
use outlook_rag_core::graphs::rag::{RagOptions, RagRunner, SEARCH_TOOL_NAME};
use outlook_rag_core::llm::{AssistantTurn, Role, ToolCall, ToolChoice, ToolSpec};
use outlook_rag_core::{ChatRequest, FilteredRetriever, GraphRunner};
use serde_json::{Value, json};

fn agent_config(max_steps: usize) -> AgentConfig {
    AgentConfig {
        model_id: "agent-model".to_string(),
        temperature: 0.0,
        max_steps,
        ..AgentConfig::default()
    }
}

async fn rag_runner(model: Arc<ScriptedModel>) -> RagRunner {
    RagRunner::new(
        model,
        FilteredRetriever::new(outlook_store().await, 3, None),
        RagOptions {
            model_id: "synth-model".to_string(),
            temperature: 0.0,
            router_model_id: "router-model".to_string(),
            classification_temperature: 0.0,
        },
    )
}

fn parallel_calls(calls: &[(&str, &str)]) -> AssistantTurn {
    AssistantTurn {
        content: String::new(),
        tool_calls: calls
            .iter()
            .map(|(id, name)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: json!({}),
            })
            .collect(),
    }
}

fn ask(message: &str) -> ChatRequest {
    ChatRequest::new("agent-model", 0.0).with_user_message(message)
}

struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "broken".to_string(),
            description: "Always fails.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _arguments: Value) -> anyhow::Result<String> {
        bail!("backend unavailable")
    }
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "echo".to_string(),
            description: "Echoes its input.".to_string(),
            parameters: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
        }
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<String> {
        Ok(arguments["text"].as_str().unwrap_or_default().to_string())
    }
}

#[tokio::test]
async fn agent_searches_documents_then_answers() {
    let rag_model = ScriptedModel::new([
        classification(&[("forecast", "AI stocks recommendations")]),
        text("AI equities are favoured [Outlook 2025, Page 33]."),
    ]);
    let agent_model = ScriptedModel::new([
        tool_call("call-1", SEARCH_TOOL_NAME, json!({"query": "Which AI stocks?"})),
        text("The outlook favours AI equities [Outlook 2025, Page 33]."),
    ]);
    let agent = jpm_react_agent(
        rag_runner(rag_model.clone()).await,
        agent_model.clone(),
        agent_config(25),
        Arc::new(InMemorySessionStorage::new()),
    );
    assert_eq!(agent.name(), "jpm_react_agent");

    let response = agent
        .invoke(ask("Which AI stocks were recommended?"), "thread-a")
        .await
        .unwrap();
    assert_eq!(
        response.content,
        "The outlook favours AI equities [Outlook 2025, Page 33]."
    );

    let history = agent.history("thread-a").await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].tool_calls[0].name, SEARCH_TOOL_NAME);
    assert_eq!(history[2].role, Role::Tool);
    assert_eq!(history[2].tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(
        history[2].content,
        "AI equities are favoured [Outlook 2025, Page 33]."
    );
    assert_eq!(history[3].role, Role::Assistant);

    let requests = agent_model.requests();
    assert_eq!(requests[0].messages[0].content, SYSTEM_PROMPT);
    assert_eq!(requests[0].tools[0].name, SEARCH_TOOL_NAME);
    assert_eq!(requests[0].tool_choice, None);
    assert_eq!(requests[1].messages.len(), 4);

    let rag_requests = rag_model.requests();
    assert_eq!(rag_requests[0].messages[1].content, "Which AI stocks?");
}

#[tokio::test]
async fn threads_keep_separate_histories() {
    let model = ScriptedModel::new([
        text("Hello!"),
        text("Hi there."),
        text("You said hello earlier."),
    ]);
    let agent = AgentRunner::new(
        "plain",
        model.clone(),
        Vec::new(),
        agent_config(25),
        Arc::new(InMemorySessionStorage::new()),
    );

    agent.invoke(ask("hello"), "one").await.unwrap();
    agent.invoke(ask("hey"), "two").await.unwrap();
    let answer = agent.invoke(ask("what did I say?"), "one").await.unwrap();
    assert_eq!(answer.content, "You said hello earlier.");

    assert_eq!(agent.history("one").await.unwrap().len(), 4);
    assert_eq!(agent.history("two").await.unwrap().len(), 2);
    assert!(agent.history("missing").await.unwrap().is_empty());

    let third = &model.requests()[2];
    let contents: Vec<&str> = third
        .messages
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(
        contents,
        ["You are a helpful assistant.", "hello", "Hello!", "what did I say?"]
    );
    assert!(third.tools.is_empty());
}

#[tokio::test]
async fn step_limit_replaces_pending_tool_calls() {
    let model = ScriptedModel::new([tool_call("c1", "echo", json!({"text": "x"}))]);
    let agent = AgentRunner::new(
        "limited",
        model.clone(),
        vec![Arc::new(EchoTool) as Arc<dyn Tool>],
        agent_config(1),
        Arc::new(InMemorySessionStorage::new()),
    );

    let response = agent.invoke(ask("loop forever"), "t").await.unwrap();
    assert_eq!(response.content, STEP_LIMIT_MESSAGE);
    assert_eq!(model.requests().len(), 1);

    let history = agent.history("t").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1].tool_calls.is_empty());
}

#[tokio::test]
async fn step_limit_streams_only_the_limit_message() {
    let mut pending = tool_call("c1", "echo", json!({"text": "x"}));
    pending.content = "Let me look that up first.".to_string();
    let model = ScriptedModel::new([text("Thinking out loud."), pending]);
    let agent = AgentRunner::new(
        "limited",
        model,
        vec![Arc::new(EchoTool) as Arc<dyn Tool>],
        agent_config(1),
        Arc::new(InMemorySessionStorage::new()),
    );

    let first: Vec<String> = agent
        .stream(ask("say something"), "t")
        .await
        .unwrap()
        .map(|token| token.unwrap())
        .collect()
        .await;
    assert_eq!(first.concat(), "Thinking out loud.");

    let second: Vec<String> = agent
        .stream(ask("now use a tool"), "t")
        .await
        .unwrap()
        .map(|token| token.unwrap())
        .collect()
        .await;
    assert_eq!(second.concat(), STEP_LIMIT_MESSAGE);

    let history = agent.history("t").await.unwrap();
    assert_eq!(history.last().unwrap().content, STEP_LIMIT_MESSAGE);
}

#[tokio::test]
async fn forced_tool_choice_applies_until_a_tool_runs() {
    let model = ScriptedModel::new([
        tool_call("c1", "echo", json!({"text": "pong"})),
        text("done"),
    ]);
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool), Arc::new(BrokenTool)];
    let agent = AgentRunner::new(
        "forced",
        model.clone(),
        tools,
        agent_config(25).with_tool_choice("echo"),
        Arc::new(InMemorySessionStorage::new()),
    );

    agent.invoke(ask("ping"), "t").await.unwrap();

    let requests = model.requests();
    assert_eq!(
        requests[0].tool_choice,
        Some(ToolChoice::Function("echo".to_string()))
    );
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[1].tool_choice, None);
    assert_eq!(requests[1].tools.len(), 2);
    assert_eq!(requests[1].messages[3].content, "pong");
}

#[tokio::test]
async fn tool_failures_are_reported_back_to_the_model() {
    let model = ScriptedModel::new([
        parallel_calls(&[("c1", "broken"), ("c2", "nonexistent")]),
        text("Sorry, the tools failed."),
    ]);
    let agent = AgentRunner::new(
        "failing",
        model.clone(),
        vec![Arc::new(BrokenTool) as Arc<dyn Tool>],
        agent_config(25),
        Arc::new(InMemorySessionStorage::new()),
    );

    let response = agent.invoke(ask("try"), "t").await.unwrap();
    assert_eq!(response.content, "Sorry, the tools failed.");

    let history = agent.history("t").await.unwrap();
    assert_eq!(
        history[2].content,
        "Error: backend unavailable\n Please fix your mistakes."
    );
    assert_eq!(
        history[3].content,
        "Error: nonexistent is not a valid tool, try one of [broken]."
    );
}

#[tokio::test]
async fn streaming_emits_only_the_final_answer() {
    let rag_model = ScriptedModel::new([
        classification(&[("mid_year", "bond markets")]),
        text("Bonds were volatile [Mid-Year Outlook, Page 9]."),
    ]);
    let agent_model = ScriptedModel::new([
        tool_call("call-1", SEARCH_TOOL_NAME, json!({"query": "bonds mid year"})),
        text("Bond markets were volatile [Mid-Year Outlook, Page 9]."),
    ]);
    let agent = jpm_react_agent(
        rag_runner(rag_model).await,
        agent_model,
        agent_config(25),
        Arc::new(InMemorySessionStorage::new()),
    );

    let tokens: Vec<String> = agent
        .stream(ask("How did bonds do?"), "s")
        .await
        .unwrap()
        .map(|token| token.unwrap())
        .collect()
        .await;

    assert_eq!(
        tokens.concat(),
        "Bond markets were volatile [Mid-Year Outlook, Page 9]."
    );
}

#[tokio::test]
async fn model_errors_propagate() {
    let agent = AgentRunner::new(
        "empty",
        ScriptedModel::new([]),
        Vec::new(),
        agent_config(25),
        Arc::new(InMemorySessionStorage::new()),
    );
    assert!(agent.invoke(ask("hello"), "t").await.is_err());
}
