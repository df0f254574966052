use std::collections::VecDeque;
use std::sync::Arc;

use tracing::warn;

use crate::documents::Document;

/// Separators tried in order, coarsest first.
pub const DEFAULT_SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", ", ", " ", ""];

/// Measures text the way chunk sizes are expressed.
pub trait LengthFunction: Send + Sync {
    fn length(&self, text: &str) -> usize;
}

/// Unicode scalar count.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharLength;

impl LengthFunction for CharLength {
    fn length(&self, text: &str) -> usize {
        text.chars().count()
    }
}

/// BPE token count using the GPT-2 (`r50k_base`) encoding.
pub struct TiktokenLength {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenLength {
    pub fn gpt2() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::r50k_base()?,
        })
    }
}

impl LengthFunction for TiktokenLength {
    fn length(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Token count from a Hugging Face `tokenizer.json`.
#[cfg(feature = "tokenizer")]
pub struct TokenizerLength {
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "tokenizer")]
impl TokenizerLength {
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|err| anyhow::anyhow!("failed to load tokenizer {}: {err}", path.display()))?;
        Ok(Self { tokenizer })
    }
}

#[cfg(feature = "tokenizer")]
impl LengthFunction for TokenizerLength {
    fn length(&self, text: &str) -> usize {
        self.tokenizer
            .encode(text, false)
            .map(|encoding| encoding.len())
            .unwrap_or_else(|_| text.chars().count())
    }
}

/// Recursive splitter: tries each separator in turn, keeps the separator at
/// the start of the following piece, and merges pieces into overlapping chunks.
#[derive(Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
    length: Arc<dyn LengthFunction>,
}

impl TextSplitter {
    /// Splitter measuring chunks in characters.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            length: Arc::new(CharLength),
        }
    }

    /// Splitter measuring chunks in GPT-2 BPE tokens.
    pub fn from_tiktoken(chunk_size: usize, chunk_overlap: usize) -> anyhow::Result<Self> {
        Ok(Self::new(chunk_size, chunk_overlap).with_length_function(Arc::new(TiktokenLength::gpt2()?)))
    }

    pub fn with_length_function(mut self, length: Arc<dyn LengthFunction>) -> Self {
        self.length = length;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split each document, recording the character offset of every chunk in
    /// `start_index`.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut chunks = Vec::new();
        for doc in documents {
            let text = doc.page_content.as_str();
            let mut index = 0usize;
            let mut previous_len = 0usize;

            for chunk in self.split_text(text) {
                let offset = floor_char_boundary(
                    text,
                    (index + previous_len).saturating_sub(self.chunk_overlap),
                );
                let found = text[offset..]
                    .find(&chunk)
                    .map(|pos| pos + offset)
                    .or_else(|| text[index..].find(&chunk).map(|pos| pos + index));
                if let Some(found) = found {
                    index = found;
                }
                previous_len = chunk.len();

                let mut metadata = doc.metadata.clone();
                metadata.insert(
                    "start_index".into(),
                    (text[..index].chars().count() as u64).into(),
                );
                chunks.push(Document {
                    page_content: chunk,
                    metadata,
                });
            }
        }
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (idx, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[idx + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut good_splits: Vec<String> = Vec::new();
        for split in split_keeping_separator(text, separator) {
            if self.length.length(&split) < self.chunk_size {
                good_splits.push(split);
                continue;
            }
            if !good_splits.is_empty() {
                chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }
            if remaining.is_empty() {
                chunks.push(split);
            } else {
                chunks.extend(self.split_recursive(&split, remaining));
            }
        }
        if !good_splits.is_empty() {
            chunks.extend(self.merge_splits(&good_splits));
        }
        chunks
    }

    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = self.length.length(split);
            if total + len > self.chunk_size && !current.is_empty() {
                if total > self.chunk_size {
                    warn!(
                        size = total,
                        chunk_size = self.chunk_size,
                        "created a chunk longer than the configured size"
                    );
                }
                push_joined(&current, &mut docs);
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some((_, popped)) => total -= popped,
                        None => break,
                    }
                }
            }
            current.push_back((split.as_str(), len));
            total += len;
        }
        push_joined(&current, &mut docs);
        docs
    }
}

/// Split documents and number the chunks sequentially in `chunk_id`.
pub fn chunk_documents(documents: &[Document], splitter: &TextSplitter) -> Vec<Document> {
    let mut chunks = splitter.split_documents(documents);
    for (idx, chunk) in chunks.iter_mut().enumerate() {
        chunk.metadata.insert("chunk_id".into(), (idx as u64).into());
    }
    chunks
}

fn push_joined(current: &VecDeque<(&str, usize)>, docs: &mut Vec<String>) {
    let joined: String = current.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(text[start..pos].to_string());
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(words: usize, word: &str) -> String {
        vec![word; words].join(" ")
    }

    #[test]
    fn short_text_is_single_chunk() {
        let splitter = TextSplitter::new(100, 20);
        let chunks = splitter.split_text("Equities outperformed bonds.");
        assert_eq!(chunks, vec!["Equities outperformed bonds.".to_string()]);
    }

    #[test]
    fn chunks_respect_size_limit() {
        let text = format!(
            "{}\n\n{}\n\n{}",
            paragraph(40, "alpha"),
            paragraph(40, "beta"),
            paragraph(40, "gamma")
        );
        let splitter = TextSplitter::new(120, 30);
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 120, "chunk too long: {chunk:?}");
            assert_eq!(chunk, chunk.trim());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = (0..60)
            .map(|idx| format!("w{idx:02}"))
            .collect::<Vec<_>>()
            .join(" ");
        let splitter = TextSplitter::new(100, 30);
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() >= 2);

        for pair in chunks.windows(2) {
            let next_first_word = pair[1].split(' ').next().unwrap();
            assert!(
                pair[0].contains(next_first_word),
                "{next_first_word} should repeat from previous chunk"
            );
        }
    }

    #[test]
    fn separator_is_kept_with_following_piece() {
        let pieces = split_keeping_separator("a. b. c", ". ");
        assert_eq!(pieces, vec!["a", ". b", ". c"]);
        let chars = split_keeping_separator("ab", "");
        assert_eq!(chars, vec!["a", "b"]);
    }

    #[test]
    fn split_documents_records_start_index_and_chunk_ids() {
        let text = format!("{}\n\n{}", paragraph(30, "first"), paragraph(30, "second"));
        let doc = Document::new(text.clone()).with_metadata("page_number", 4);
        let splitter = TextSplitter::new(150, 0);

        let chunks = chunk_documents(&[doc], &splitter);
        assert!(chunks.len() >= 2);
        for (idx, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata["chunk_id"], idx as u64);
            assert_eq!(chunk.metadata["page_number"], 4);
            let start = chunk.metadata["start_index"].as_u64().unwrap() as usize;
            let tail: String = text.chars().skip(start).collect();
            assert!(tail.starts_with(&chunk.page_content));
        }
    }

    #[test]
    fn tiktoken_counts_bpe_tokens() {
        let length = TiktokenLength::gpt2().unwrap();
        assert_eq!(length.length("hello world"), 2);
        assert_eq!(length.length(""), 0);
    }

    #[test]
    fn tiktoken_splitter_sizes_chunks_in_tokens() {
        let text = paragraph(200, "market");
        let splitter = TextSplitter::from_tiktoken(20, 5).unwrap();
        let length = TiktokenLength::gpt2().unwrap();

        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(length.length(chunk) <= 20, "too many tokens: {chunk:?}");
        }
        // Twenty tokens of whole words span far more than twenty characters.
        assert!(chunks[0].chars().count() > 100);
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let text = "Über die Märkte — Ausblick 2025. ".repeat(40);
        let doc = Document::new(text);
        let chunks = TextSplitter::new(100, 25).split_documents(&[doc]);
        assert!(!chunks.is_empty());
    }
}
