use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Metadata = Map<String, Value>;

/// A unit of text plus its metadata, as produced by extraction and chunking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Page number of the excerpt, falling back to `page`.
    pub fn page(&self) -> Option<&Value> {
        self.metadata
            .get("page_number")
            .or_else(|| self.metadata.get("page"))
            .filter(|value| !value.is_null())
    }

    /// Page label used in prompts and logs (`?` when unknown).
    pub fn page_label(&self) -> String {
        match self.page() {
            Some(Value::String(page)) => page.clone(),
            Some(other) => other.to_string(),
            None => "?".to_string(),
        }
    }
}
