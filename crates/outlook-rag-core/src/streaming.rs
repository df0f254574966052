//! Token fan-out from graph tasks to whoever is consuming a run.
//!
//! Graph tasks only see a `graph_flow::Context`, so a run stores its stream id
//! in the context and tasks resolve a [`TokenSink`] through the shared
//! [`StreamHub`]. Runs without a registered stream get a disabled sink.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Context key holding the active stream id.
pub const STREAM_ID_KEY: &str = "stream.id";

/// Destination for generated tokens; a no-op when disabled.
#[derive(Clone, Default)]
pub struct TokenSink(Option<UnboundedSender<String>>);

impl TokenSink {
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self(Some(sender))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    pub fn push(&self, token: &str) {
        if token.is_empty() {
            return;
        }
        if let Some(sender) = &self.0 {
            // Receiver gone means the caller stopped listening.
            let _ = sender.send(token.to_string());
        }
    }
}

#[derive(Clone, Default)]
pub struct StreamHub {
    channels: Arc<DashMap<String, UnboundedSender<String>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream; it is removed when the registration drops.
    pub fn open(&self) -> (StreamRegistration, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();
        self.channels.insert(id.clone(), tx);
        (
            StreamRegistration {
                id,
                hub: self.clone(),
            },
            rx,
        )
    }

    pub fn sink(&self, id: Option<&str>) -> TokenSink {
        id.and_then(|id| self.channels.get(id).map(|entry| entry.value().clone()))
            .map(TokenSink::new)
            .unwrap_or_default()
    }

    /// Sink for the stream recorded in a graph context, if any.
    pub fn sink_for(&self, ctx: &graph_flow::Context) -> TokenSink {
        let id: Option<String> = ctx.get_sync(STREAM_ID_KEY);
        self.sink(id.as_deref())
    }

    pub fn active(&self) -> usize {
        self.channels.len()
    }
}

pub struct StreamRegistration {
    id: String,
    hub: StreamHub,
}

impl StreamRegistration {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for StreamRegistration {
    fn drop(&mut self) {
        self.hub.channels.remove(&self.id);
    }
}
