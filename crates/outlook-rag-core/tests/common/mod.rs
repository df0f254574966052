#![allow(dead_code)]

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use outlook_rag_core::Document;
use outlook_rag_core::embeddings::Embedder;
use outlook_rag_core::llm::{
    AssistantTurn, CompletionRequest, LanguageModel, LlmError, ToolCall,
};
use outlook_rag_core::streaming::TokenSink;
use outlook_rag_core::vectorstore::{LocalVectorStore, VectorStore};
use serde_json::{Value, json};

const DIMENSIONS: usize = 64;

/// Bag-of-words embedder: each lowercase word increments one hashed bucket.
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn embed(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() as usize) % DIMENSIONS] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_documents(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| Self::embed(text)).collect())
    }
}

/// Replays canned turns in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedModel {
    turns: Mutex<VecDeque<AssistantTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(turns: impl IntoIterator<Item = AssistantTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantTurn, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))
    }

    /// Streams the reply word by word, keeping whitespace attached.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        sink: &TokenSink,
    ) -> Result<AssistantTurn, LlmError> {
        let turn = self.complete(request).await?;
        for token in turn.content.split_inclusive(' ') {
            sink.push(token);
        }
        Ok(turn)
    }
}

pub fn text(content: &str) -> AssistantTurn {
    AssistantTurn::text(content)
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> AssistantTurn {
    AssistantTurn {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

pub fn classification(routes: &[(&str, &str)]) -> AssistantTurn {
    let classifications: Vec<Value> = routes
        .iter()
        .map(|(source, query)| json!({"source": source, "query": query}))
        .collect();
    text(&json!({ "classifications": classifications }).to_string())
}

/// Small index with three forecast pages and two mid-year pages.
pub async fn outlook_store() -> Arc<LocalVectorStore> {
    let store = Arc::new(LocalVectorStore::in_memory(Arc::new(HashingEmbedder)));
    let page = |content: &str, doc_type: &str, page: u64| {
        Document::new(content)
            .with_metadata("doc_type", doc_type)
            .with_metadata("page_number", page)
    };
    store
        .add_documents(vec![
            page("AI equities and semiconductor stocks are recommended", "forecast", 33),
            page("Trade policy changes may impact markets", "forecast", 21),
            page("Bond yields expected to stay elevated", "forecast", 12),
            page("AI equities rallied strongly in the first half", "mid_year", 4),
            page("Bond markets were volatile", "mid_year", 9),
        ])
        .await
        .unwrap();
    store
}
