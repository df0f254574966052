use crate::config::Settings;
use crate::graphs::{
    ChatRequest, DEFAULT_THREAD_ID, DynGraphRunner, GraphRegistry, TokenStream,
};

/// Single-message chat front end over any registered graph.
#[derive(Clone)]
pub struct ChatService {
    runner: DynGraphRunner,
    model_id: String,
    temperature: f32,
}

impl ChatService {
    pub fn new(runner: DynGraphRunner, model_id: impl Into<String>, temperature: f32) -> Self {
        Self {
            runner,
            model_id: model_id.into(),
            temperature,
        }
    }

    /// Resolve `graph` (or the configured default) from `registry`.
    pub async fn from_registry(
        registry: &GraphRegistry,
        settings: &Settings,
        graph: Option<&str>,
    ) -> anyhow::Result<Self> {
        let name = graph.unwrap_or(settings.graph.default_graph.as_str());
        let runner = registry.get_runner(name).await?;
        Ok(Self::new(
            runner,
            settings.llm.model_id.clone(),
            settings.llm.default_temperature,
        ))
    }

    pub fn graph_name(&self) -> &str {
        self.runner.name()
    }

    pub fn runner(&self) -> &DynGraphRunner {
        &self.runner
    }

    fn request(&self, message: &str) -> ChatRequest {
        ChatRequest::new(self.model_id.clone(), self.temperature).with_user_message(message)
    }

    pub async fn chat(&self, message: &str, thread_id: Option<&str>) -> anyhow::Result<String> {
        let response = self
            .runner
            .invoke(self.request(message), thread_id.unwrap_or(DEFAULT_THREAD_ID))
            .await?;
        Ok(response.content)
    }

    pub async fn stream_chat(
        &self,
        message: &str,
        thread_id: Option<&str>,
    ) -> anyhow::Result<TokenStream> {
        self.runner
            .stream(self.request(message), thread_id.unwrap_or(DEFAULT_THREAD_ID))
            .await
    }
}
