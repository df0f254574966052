use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::sse::{SseDecoder, SseEvent};
use super::types::{
    AssistantTurn, ChatMessage, CompletionRequest, ResponseFormat, Role, ToolCall, ToolChoice,
};
use super::{LanguageModel, LlmError};
use crate::config::Settings;
use crate::security::SecretValue;
use crate::streaming::TokenSink;

/// Chat completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: SecretValue,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretValue,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        // Streams get no overall deadline; `timeout` applies per chunk instead.
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|err| LlmError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, LlmError> {
        Self::new(
            settings.llm.base_url.clone(),
            settings.api_key()?,
            Duration::from_secs(settings.llm.request_timeout_secs),
        )
    }

    async fn send(&self, body: &Value, streaming: bool) -> Result<reqwest::Response, LlmError> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(body);
        if !streaming {
            builder = builder.timeout(self.timeout);
        }
        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| timed_out(self.timeout))?
            .map_err(|err| LlmError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    #[instrument(name = "llm.complete", skip_all, fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantTurn, LlmError> {
        let body = request_body(&request, false);
        let text = self
            .send(&body, false)
            .await?
            .text()
            .await
            .map_err(|err| LlmError::Network(err.to_string()))?;
        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|err| LlmError::Parse(format!("failed to parse completion: {err}")))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| LlmError::InvalidResponse("completion had no choices".to_string()))?;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            })
            .collect();
        Ok(AssistantTurn {
            content: message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    #[instrument(name = "llm.stream", skip_all, fields(model = %request.model))]
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        sink: &TokenSink,
    ) -> Result<AssistantTurn, LlmError> {
        let body = request_body(&request, true);
        let response = self.send(&body, true).await?;

        let mut decoder = SseDecoder::new();
        let mut accumulator = StreamAccumulator::default();
        let mut stream = Box::pin(response.bytes_stream());

        while let Some(chunk) = next_within(&mut stream, self.timeout).await? {
            let chunk = chunk.map_err(|err| LlmError::Network(err.to_string()))?;
            for event in decoder.push(&chunk) {
                accumulator.apply(event, sink)?;
            }
            if decoder.is_done() {
                break;
            }
        }
        if let Some(event) = decoder.finish() {
            accumulator.apply(event, sink)?;
        }

        let turn = accumulator.into_turn();
        debug!(
            chars = turn.content.len(),
            tool_calls = turn.tool_calls.len(),
            "streamed completion finished"
        );
        Ok(turn)
    }
}

fn request_body(request: &CompletionRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": request.model,
        "temperature": request.temperature,
        "messages": request.messages.iter().map(message_to_wire).collect::<Vec<_>>(),
        "stream": stream,
    });

    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }

    if let Some(choice) = &request.tool_choice {
        body["tool_choice"] = match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Function(name) => json!({"type": "function", "function": {"name": name}}),
        };
    }

    if let Some(ResponseFormat::JsonSchema {
        name,
        schema,
        strict,
    }) = &request.response_format
    {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {"name": name, "schema": schema, "strict": strict},
        });
    }

    body
}

fn message_to_wire(message: &ChatMessage) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                json!(message.content)
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        role => json!({"role": role.as_str(), "content": message.content}),
    }
}

/// Tool arguments arrive as a JSON string; keep malformed payloads verbatim.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Rebuilds a full turn from streamed deltas; tool calls are keyed by `index`.
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
}

impl StreamAccumulator {
    fn apply(&mut self, event: SseEvent, sink: &TokenSink) -> Result<(), LlmError> {
        let SseEvent::Data(data) = event else {
            return Ok(());
        };
        let chunk: StreamChunk = serde_json::from_str(&data)
            .map_err(|err| LlmError::Parse(format!("failed to parse stream chunk: {err}")))?;

        for choice in chunk.choices {
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(content) = delta.content {
                sink.push(&content);
                self.content.push_str(&content);
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let entry = self.tool_calls.entry(call.index).or_default();
                if let Some(id) = call.id {
                    entry.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(())
    }

    fn into_turn(self) -> AssistantTurn {
        AssistantTurn {
            content: self.content,
            tool_calls: self
                .tool_calls
                .into_values()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: parse_arguments(&call.arguments),
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Next item of `stream`, failing if nothing arrives within `idle`.
async fn next_within<S>(stream: &mut S, idle: Duration) -> Result<Option<S::Item>, LlmError>
where
    S: futures::Stream + Unpin,
{
    tokio::time::timeout(idle, stream.next())
        .await
        .map_err(|_| timed_out(idle))
}

fn timed_out(after: Duration) -> LlmError {
    LlmError::Network(format!("no response from model within {after:?}"))
}
