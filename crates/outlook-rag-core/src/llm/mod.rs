//! Chat model abstraction and the OpenAI-compatible client.

mod openai;
mod sse;
mod types;

pub use openai::OpenAiClient;
pub use sse::{SseDecoder, SseEvent};
pub use types::{
    AssistantTurn, ChatMessage, CompletionRequest, ResponseFormat, Role, ToolCall, ToolChoice,
    ToolSpec,
};

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::RagError;
use crate::config::Settings;
use crate::streaming::TokenSink;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Network(String),
    #[error("model API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("{0}")]
    Parse(String),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Config(#[from] RagError),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantTurn, LlmError>;

    /// Complete while pushing content tokens into `sink` as they are produced.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        sink: &TokenSink,
    ) -> Result<AssistantTurn, LlmError> {
        let turn = self.complete(request).await?;
        sink.push(&turn.content);
        Ok(turn)
    }
}

pub type DynLanguageModel = Arc<dyn LanguageModel>;

/// Request a reply constrained to `schema` and deserialize it.
pub async fn complete_structured<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    request: CompletionRequest,
    schema_name: &str,
    schema: Value,
) -> Result<T, LlmError> {
    let turn = model
        .complete(request.with_json_schema(schema_name, schema))
        .await?;
    serde_json::from_str(turn.content.trim()).map_err(|err| {
        LlmError::InvalidResponse(format!("structured output did not match {schema_name}: {err}"))
    })
}

/// The chat model used by every graph.
pub fn load_chat_model(settings: &Settings) -> Result<DynLanguageModel, LlmError> {
    Ok(Arc::new(OpenAiClient::from_settings(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Fixed(&'static str);

    #[async_trait]
    impl LanguageModel for Fixed {
        async fn complete(&self, request: CompletionRequest) -> Result<AssistantTurn, LlmError> {
            assert!(matches!(
                request.response_format,
                Some(ResponseFormat::JsonSchema { strict: true, .. })
            ));
            Ok(AssistantTurn::text(self.0))
        }
    }

    #[derive(Debug, Deserialize)]
    struct Verdict {
        ok: bool,
    }

    #[tokio::test]
    async fn structured_output_is_deserialized() {
        let request = CompletionRequest::new("m", 0.0, vec![ChatMessage::user("q")]);
        let verdict: Verdict = complete_structured(
            &Fixed(r#" {"ok": true} "#),
            request.clone(),
            "verdict",
            json!({"type": "object"}),
        )
        .await
        .unwrap();
        assert!(verdict.ok);

        let err = complete_structured::<Verdict>(&Fixed("nope"), request, "verdict", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn default_streaming_pushes_whole_reply() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let turn = Fixed("{}")
            .complete_streaming(
                CompletionRequest::new("m", 0.0, vec![]).with_json_schema("s", json!({})),
                &TokenSink::new(tx),
            )
            .await
            .unwrap();
        assert_eq!(turn.content, "{}");
        assert_eq!(rx.recv().await.as_deref(), Some("{}"));
    }
}
