use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::runner::GraphRunner;
use super::{AGENT_GRAPH_NAME, RAG_GRAPH_NAME, jpm, rag};
use crate::RagError;
use crate::config::Settings;

pub type DynGraphRunner = Arc<dyn GraphRunner>;

type RunnerFactory =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<DynGraphRunner>> + Send + Sync>;

/// Graph name → factory producing a fully wired runner, in registration order.
#[derive(Clone, Default)]
pub struct GraphRegistry {
    factories: Vec<(String, RunnerFactory)>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `jpm_rag` and `jpm_react_agent` built from `settings`.
    pub fn with_defaults(settings: Arc<Settings>) -> Self {
        let mut registry = Self::new();

        let rag_settings = settings.clone();
        registry.register(RAG_GRAPH_NAME, move || {
            let settings = rag_settings.clone();
            async move {
                let runner = rag::RagRunner::from_settings(&settings).await?;
                Ok(Arc::new(runner) as DynGraphRunner)
            }
        });

        registry.register(AGENT_GRAPH_NAME, move || {
            let settings = settings.clone();
            async move {
                let runner = jpm::build_jpm_react_agent(&settings).await?;
                Ok(Arc::new(runner) as DynGraphRunner)
            }
        });

        registry
    }

    /// Add or replace a factory; a replaced name keeps its original position.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<DynGraphRunner>> + Send + 'static,
    {
        let name = name.into();
        let factory: RunnerFactory = Arc::new(move || factory().boxed());
        match self.factories.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = factory,
            None => self.factories.push((name, factory)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(existing, _)| existing == name)
    }

    pub fn list_graphs(&self) -> Vec<&str> {
        self.factories.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Build the runner registered under `name`.
    pub async fn get_runner(&self, name: &str) -> anyhow::Result<DynGraphRunner> {
        let factory = self
            .factories
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, factory)| factory.clone())
            .ok_or_else(|| RagError::unknown_graph(name, self.list_graphs()))?;
        factory().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::runner::{ChatRequest, ChatResponse, TokenStream};
    use async_trait::async_trait;
    use futures::StreamExt;

    struct Echo(&'static str);

    #[async_trait]
    impl GraphRunner for Echo {
        fn name(&self) -> &str {
            self.0
        }

        async fn invoke(
            &self,
            request: ChatRequest,
            _thread_id: &str,
        ) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse {
                content: request.last_user_message().to_string(),
            })
        }

        async fn stream(
            &self,
            request: ChatRequest,
            _thread_id: &str,
        ) -> anyhow::Result<TokenStream> {
            let content = request.last_user_message().to_string();
            Ok(futures::stream::iter([Ok(content)]).boxed())
        }
    }

    fn echo_factory(
        name: &'static str,
    ) -> impl Fn() -> futures::future::Ready<anyhow::Result<DynGraphRunner>> + Send + Sync {
        move || futures::future::ready(Ok(Arc::new(Echo(name)) as DynGraphRunner))
    }

    #[tokio::test]
    async fn lists_in_registration_order_and_builds_runners() {
        let mut registry = GraphRegistry::new();
        registry.register("zeta", echo_factory("zeta"));
        registry.register("alpha", echo_factory("alpha"));
        registry.register("zeta", echo_factory("zeta-v2"));

        assert_eq!(registry.list_graphs(), ["zeta", "alpha"]);
        let runner = registry.get_runner("zeta").await.unwrap();
        assert_eq!(runner.name(), "zeta-v2");
    }

    #[tokio::test]
    async fn unknown_graph_lists_available_names() {
        let mut registry = GraphRegistry::new();
        let err = registry.get_runner("missing").await.err().unwrap();
        assert_eq!(err.to_string(), "Unknown graph: missing. Available: (none)");

        registry.register("jpm_rag", echo_factory("jpm_rag"));
        registry.register("jpm_react_agent", echo_factory("jpm_react_agent"));
        let err = registry.get_runner("nope").await.err().unwrap();
        assert_eq!(
            err.to_string(),
            "Unknown graph: nope. Available: jpm_rag, jpm_react_agent"
        );
    }

    #[test]
    fn default_registry_names_both_graphs() {
        let registry = GraphRegistry::with_defaults(Arc::new(Settings::default()));
        assert_eq!(registry.list_graphs(), [RAG_GRAPH_NAME, AGENT_GRAPH_NAME]);
        assert!(registry.contains("jpm_rag"));
    }
}
