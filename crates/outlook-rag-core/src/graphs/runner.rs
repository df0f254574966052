use std::future::Future;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::Instrument;

use crate::streaming::StreamHub;

/// Thread used when the caller does not name one.
pub const DEFAULT_THREAD_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub role: String,
    pub content: String,
}

impl RequestMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Graph-agnostic chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<RequestMessage>,
    pub model_id: String,
    #[serde(default)]
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(model_id: impl Into<String>, temperature: f32) -> Self {
        Self {
            messages: Vec::new(),
            model_id: model_id.into(),
            temperature,
        }
    }

    pub fn with_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(RequestMessage::new(role, content));
        self
    }

    pub fn with_user_message(self, content: impl Into<String>) -> Self {
        self.with_message("user", content)
    }

    /// Content of the most recent user message, or `""`.
    pub fn last_user_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == "user")
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
}

/// Answer tokens as they are generated; a failed run ends with one `Err`.
pub type TokenStream = BoxStream<'static, anyhow::Result<String>>;

/// Uniform surface over every executable graph.
#[async_trait]
pub trait GraphRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, request: ChatRequest, thread_id: &str) -> anyhow::Result<ChatResponse>;

    async fn stream(&self, request: ChatRequest, thread_id: &str) -> anyhow::Result<TokenStream>;
}

/// Run `run` in the background with a fresh stream registered on `hub`.
///
/// `run` receives the stream id to store in the graph context. Tokens pushed
/// to that stream are yielded in order; the stream closes once the run ends.
pub(crate) fn stream_run<F, Fut>(hub: &StreamHub, run: F) -> TokenStream
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let (registration, receiver) = hub.open();
    let run = run(registration.id().to_string());
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(
        async move {
            let result = run.await;
            drop(registration);
            let _ = done_tx.send(result);
        }
        .in_current_span(),
    );

    let outcome = stream::once(async move {
        match done_rx.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(Err(err)),
            Err(_) => Some(Err(anyhow!("graph run ended unexpectedly"))),
        }
    })
    .filter_map(|item| async move { item });

    UnboundedReceiverStream::new(receiver)
        .map(Ok)
        .chain(outcome)
        .boxed()
}
