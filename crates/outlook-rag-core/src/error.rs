use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Outlook RAG.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unknown graph: {name}. Available: {available}")]
    UnknownGraph { name: String, available: String },
    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),
    #[error("Processing failed: {0}")]
    Processing(String),
    #[error("vector store error: {0}")]
    VectorStore(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn unknown_graph<I, S>(name: impl Into<String>, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let available = available
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Self::UnknownGraph {
            name: name.into(),
            available: if available.is_empty() {
                "(none)".to_string()
            } else {
                available
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_graph_lists_available_names() {
        let err = RagError::unknown_graph("nope", ["jpm_rag", "jpm_react_agent"]);
        assert_eq!(
            err.to_string(),
            "Unknown graph: nope. Available: jpm_rag, jpm_react_agent"
        );
    }

    #[test]
    fn unknown_graph_reports_empty_registry() {
        let err = RagError::unknown_graph("nope", Vec::<String>::new());
        assert_eq!(err.to_string(), "Unknown graph: nope. Available: (none)");
    }
}
