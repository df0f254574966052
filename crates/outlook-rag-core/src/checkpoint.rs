//! Session storage backing conversation memory.

use std::sync::Arc;

use graph_flow::{InMemorySessionStorage, SessionStorage};
use tracing::info;

use crate::RagError;
use crate::config::{CheckpointerConfig, CheckpointerKind};

/// Build the checkpointer selected by `checkpointer.kind`.
pub async fn create_checkpointer(
    config: &CheckpointerConfig,
) -> Result<Arc<dyn SessionStorage>, RagError> {
    match config.kind {
        CheckpointerKind::Memory => Ok(Arc::new(InMemorySessionStorage::new())),
        CheckpointerKind::Postgres => {
            let uri = config
                .postgres_uri
                .as_deref()
                .filter(|uri| !uri.trim().is_empty())
                .ok_or_else(|| {
                    RagError::InvalidConfiguration(
                        "POSTGRES_URI is required when CHECKPOINTER_TYPE=postgres".to_string(),
                    )
                })?;
            connect_postgres(uri).await
        }
    }
}

#[cfg(feature = "postgres-session")]
async fn connect_postgres(uri: &str) -> Result<Arc<dyn SessionStorage>, RagError> {
    let storage = graph_flow::PostgresSessionStorage::connect(uri)
        .await
        .map_err(|err| RagError::InvalidConfiguration(format!("postgres checkpointer: {err}")))?;
    info!("connected postgres checkpointer");
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "postgres-session"))]
async fn connect_postgres(_uri: &str) -> Result<Arc<dyn SessionStorage>, RagError> {
    info!("postgres checkpointer requested without the postgres-session feature");
    Err(RagError::InvalidConfiguration(
        "CHECKPOINTER_TYPE=postgres requires building with the `postgres-session` feature"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_is_default() {
        let storage = create_checkpointer(&CheckpointerConfig::default()).await;
        assert!(storage.is_ok());
    }

    #[tokio::test]
    async fn postgres_requires_uri() {
        let config = CheckpointerConfig {
            kind: CheckpointerKind::Postgres,
            postgres_uri: None,
        };
        let err = create_checkpointer(&config).await.err().unwrap();
        assert!(err.to_string().contains("POSTGRES_URI is required"));
    }
}
