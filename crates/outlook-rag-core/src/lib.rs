//! Outlook RAG core: retrieval-augmented chat over the J.P. Morgan 2025 outlook
//! documents, built on `graph_flow`.
//!
//! The crate provides document ingestion, a pluggable vector index, the
//! classify → retrieve → synthesize graph, and a checkpointed tool-calling
//! agent that uses that graph as a search tool.

pub mod checkpoint;
pub mod config;
pub mod documents;
pub mod embeddings;
mod error;
pub mod graphs;
pub mod ingestion;
pub mod llm;
mod metrics;
pub mod retrieval;
mod security;
pub mod service;
pub mod streaming;
pub mod telemetry;
pub mod vectorstore;

pub use config::{ConfigLoader, Settings};
pub use documents::{Document, Metadata};
pub use error::RagError;
pub use graphs::{
    AGENT_GRAPH_NAME, ChatRequest, ChatResponse, DEFAULT_THREAD_ID, GraphRegistry, GraphRunner,
    RAG_GRAPH_NAME, TokenStream,
};
pub use retrieval::FilteredRetriever;
pub use security::{SecretValue, require_env};
pub use service::ChatService;
pub use telemetry::{TelemetryOptions, cli_span, init_telemetry};
