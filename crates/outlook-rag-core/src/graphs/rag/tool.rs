use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::RagRunner;
use crate::graphs::agent::Tool;
use crate::llm::ToolSpec;

pub const SEARCH_TOOL_NAME: &str = "search_jpm_documents";

const DESCRIPTION: &str = "Search J.P. Morgan Outlook and Mid-Year documents.

Use this tool to find information about:
- 2025 market predictions and investment themes (from Outlook 2025)
- Actual mid-year 2025 performance and results (from Mid-Year Outlook)
- Stock analysis, sector recommendations, and portfolio strategies
- Comparisons between predictions and actual outcomes

Returns a synthesized answer with citations from the relevant documents.";

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

/// Exposes the RAG pipeline to the agent; returns the synthesized answer.
pub struct SearchDocumentsTool {
    rag: RagRunner,
}

impl SearchDocumentsTool {
    pub fn new(rag: RagRunner) -> Self {
        Self { rag }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: SEARCH_TOOL_NAME.to_string(),
            description: DESCRIPTION.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The question to search for in J.P. Morgan documents."
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<String> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|err| anyhow!("invalid arguments for {SEARCH_TOOL_NAME}: {err}"))?;
        let outcome = self.rag.run_query(&args.query, None, None, None).await?;
        Ok(outcome.answer)
    }
}
