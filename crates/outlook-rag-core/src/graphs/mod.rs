//! Executable graphs built on `graph-flow`, plus the registry that names them.

pub mod agent;
pub mod jpm;
pub mod rag;
pub mod registry;
pub mod runner;

pub use registry::{DynGraphRunner, GraphRegistry};
pub use runner::{
    ChatRequest, ChatResponse, DEFAULT_THREAD_ID, GraphRunner, RequestMessage, TokenStream,
};

use anyhow::anyhow;
use graph_flow::{ExecutionStatus, FlowRunner, GraphError};

pub const RAG_GRAPH_NAME: &str = "jpm_rag";
pub const AGENT_GRAPH_NAME: &str = "jpm_react_agent";

pub(crate) fn task_error(err: impl std::fmt::Display) -> GraphError {
    GraphError::TaskExecutionFailed(err.to_string())
}

/// Step the session until the graph reports completion.
pub(crate) async fn run_to_completion(runner: &FlowRunner, session_id: &str) -> anyhow::Result<()> {
    loop {
        let result = runner
            .run(session_id)
            .await
            .map_err(|err| anyhow!("graph execution failure: {err}"))?;

        match result.status {
            ExecutionStatus::Completed => return Ok(()),
            ExecutionStatus::WaitingForInput => continue,
            ExecutionStatus::Error(message) => return Err(anyhow!(message)),
        }
    }
}
