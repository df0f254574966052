use std::collections::HashSet;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::documents::{Document, Metadata};

/// Result of running a processor over a single file.
#[derive(Debug, Clone, Default)]
pub struct ProcessedDocument {
    pub documents: Vec<Document>,
    pub source_file: String,
    pub page_count: Option<u64>,
    pub error: Option<String>,
}

impl ProcessedDocument {
    fn failed(source_file: String, error: impl Into<String>) -> Self {
        Self {
            documents: Vec::new(),
            source_file,
            page_count: None,
            error: Some(error.into()),
        }
    }
}

/// Extracts page-level documents from a file. New formats are added by
/// implementing this trait rather than editing existing processors.
pub trait DocumentProcessor: Send + Sync {
    /// Lower-case extensions including the dot, e.g. `.pdf`.
    fn supported_extensions(&self) -> &[&'static str];

    fn can_process(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        let ext = format!(".{}", ext.to_ascii_lowercase());
        self.supported_extensions().iter().any(|s| *s == ext)
    }

    /// Never panics; extraction failures land in `ProcessedDocument::error`.
    fn process(&self, path: &Path) -> ProcessedDocument;
}

static SCRIPT_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("invalid script regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("invalid tag regex"));
static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n(\s*\n)+").expect("invalid blank line regex"));

/// Text extraction for PDF, plain text, markdown and HTML files.
#[derive(Debug, Clone, Default)]
pub struct TextExtractor;

impl TextExtractor {
    const SUPPORTED: [&'static str; 5] = [".pdf", ".txt", ".md", ".html", ".htm"];

    pub fn new() -> Self {
        Self
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, String> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => pdf_extract::extract_text_by_pages(path)
                .map_err(|err| format!("Failed to extract PDF text: {err}")),
            "html" | "htm" => fs::read_to_string(path)
                .map(|raw| vec![strip_html(&raw)])
                .map_err(|err| err.to_string()),
            _ => fs::read_to_string(path)
                .map(|text| vec![text])
                .map_err(|err| err.to_string()),
        }
    }
}

impl DocumentProcessor for TextExtractor {
    fn supported_extensions(&self) -> &[&'static str] {
        &Self::SUPPORTED
    }

    fn process(&self, path: &Path) -> ProcessedDocument {
        let source_file = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        if !path.exists() {
            return ProcessedDocument::failed(
                source_file,
                format!("File not found: {}", path.display()),
            );
        }

        let pages = match self.extract_pages(path) {
            Ok(pages) => pages,
            Err(err) => return ProcessedDocument::failed(source_file, err),
        };

        let documents: Vec<Document> = pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(idx, text)| {
                let page_number = idx as u64 + 1;
                let mut metadata = Metadata::new();
                metadata.insert("source".into(), path.display().to_string().into());
                metadata.insert("filename".into(), source_file.clone().into());
                metadata.insert("page_number".into(), page_number.into());
                metadata.insert("category".into(), "Page".into());
                metadata.insert(
                    "element_id".into(),
                    format!("{source_file}#page={page_number}").into(),
                );
                Document {
                    page_content: text,
                    metadata,
                }
            })
            .collect();

        let page_count = extract_page_count(&documents);

        ProcessedDocument {
            documents,
            source_file,
            page_count,
            error: None,
        }
    }
}

fn strip_html(raw: &str) -> String {
    let without_scripts = SCRIPT_STYLE.replace_all(raw, "");
    let text = TAG.replace_all(&without_scripts, "\n");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");
    BLANK_LINES.replace_all(text.trim(), "\n\n").to_string()
}

fn extract_page_count(docs: &[Document]) -> Option<u64> {
    let pages: HashSet<u64> = docs
        .iter()
        .filter_map(|doc| doc.metadata.get("page_number").and_then(Value::as_u64))
        .collect();
    pages.into_iter().max()
}
