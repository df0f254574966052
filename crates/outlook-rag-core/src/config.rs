use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Deserialize;

use crate::ingestion::DocumentCatalog;
use crate::{RagError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "OUTLOOK_RAG_CONFIG";

/// Top-level settings, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub paths: PathsConfig,
    pub graph: GraphConfig,
    pub checkpointer: CheckpointerConfig,
    pub logging: LoggingConfig,
    pub catalog: DocumentCatalog,
}

impl Settings {
    /// Resolve the model provider API key (from environment only).
    pub fn api_key(&self) -> Result<SecretValue, RagError> {
        require_env(&self.llm.api_key_env)
    }

    /// Create the data, document and index directories if missing.
    pub fn ensure_directories(&self) -> Result<(), RagError> {
        for dir in [
            &self.paths.data_dir,
            &self.paths.pdf_dir,
            &self.paths.index_dir,
        ] {
            fs::create_dir_all(dir).map_err(|err| RagError::config_io(dir.clone(), err))?;
        }
        Ok(())
    }

    /// Apply the flat environment overrides (`MODEL_ID`, `CHUNK_SIZE`, ...).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get("MODEL_ID") {
            self.llm.model_id = value;
        }
        if let Some(value) = get("ROUTER_MODEL_ID") {
            self.llm.router_model_id = value;
        }
        if let Some(value) = get("DEFAULT_TEMPERATURE") {
            self.llm.default_temperature = parse_value("DEFAULT_TEMPERATURE", &value)?;
        }
        if let Some(value) = get("EMBEDDING_MODEL") {
            self.embedding.model = value;
        }
        if let Some(value) = get("RETRIEVAL_K") {
            self.retrieval.k = parse_value("RETRIEVAL_K", &value)?;
        }
        if let Some(value) = get("RETRIEVAL_MAX_DISTANCE") {
            self.retrieval.max_distance = match value.to_ascii_lowercase().as_str() {
                "none" | "null" => None,
                _ => Some(parse_value("RETRIEVAL_MAX_DISTANCE", &value)?),
            };
        }
        if let Some(value) = get("CHUNK_SIZE") {
            self.chunking.chunk_size = parse_value("CHUNK_SIZE", &value)?;
        }
        if let Some(value) = get("CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_value("CHUNK_OVERLAP", &value)?;
        }
        if let Some(value) = get("DATA_DIR") {
            self.paths.data_dir = PathBuf::from(value);
        }
        if let Some(value) = get("PDF_DIR") {
            self.paths.pdf_dir = PathBuf::from(value);
        }
        if let Some(value) = get("INDEX_DIR") {
            self.paths.index_dir = PathBuf::from(value);
        }
        if let Some(value) = get("DEFAULT_GRAPH") {
            self.graph.default_graph = value;
        }
        if let Some(value) = get("CHECKPOINTER_TYPE") {
            self.checkpointer.kind = value.parse()?;
        }
        if let Some(value) = get("POSTGRES_URI") {
            self.checkpointer.postgres_uri = Some(value);
        }
        if let Some(value) = get("LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = get("JSON_LOGS") {
            self.logging.json = parse_bool(&value).ok_or_else(|| {
                RagError::InvalidConfiguration("JSON_LOGS must be true or false".into())
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RagError> {
        let invalid = |msg: String| Err(RagError::InvalidConfiguration(msg));

        if !(0.0..=2.0).contains(&self.llm.default_temperature) {
            return invalid(format!(
                "DEFAULT_TEMPERATURE ({}) must be between 0.0 and 2.0",
                self.llm.default_temperature
            ));
        }
        if self.llm.api_key_env.trim().is_empty() {
            return invalid("llm.api_key_env must reference an environment variable".into());
        }
        if !(1..=20).contains(&self.retrieval.k) {
            return invalid(format!(
                "RETRIEVAL_K ({}) must be between 1 and 20",
                self.retrieval.k
            ));
        }
        if !(100..=4000).contains(&self.chunking.chunk_size) {
            return invalid(format!(
                "CHUNK_SIZE ({}) must be between 100 and 4000",
                self.chunking.chunk_size
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return invalid(format!(
                "CHUNK_OVERLAP ({}) must be less than CHUNK_SIZE ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            ));
        }
        if self.checkpointer.kind == CheckpointerKind::Postgres
            && self
                .checkpointer
                .postgres_uri
                .as_deref()
                .is_none_or(|uri| uri.trim().is_empty())
        {
            return invalid("POSTGRES_URI is required when CHECKPOINTER_TYPE=postgres".into());
        }
        Ok(())
    }
}

/// Helper to load settings from TOML plus environment overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load settings from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument (must exist).
    /// 2. `OUTLOOK_RAG_CONFIG` environment variable (must exist).
    /// 3. `config.toml` in the current working directory, if present.
    ///
    /// Environment overrides are applied on top, then the result is validated
    /// and the data directories are created.
    pub fn load(path: Option<PathBuf>) -> Result<Settings, RagError> {
        let mut settings = match resolve_path(path) {
            Some(candidate) => Self::from_file(&candidate)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Self::from_file(fallback)?
                } else {
                    Settings::default()
                }
            }
        };

        settings.apply_overrides(|key| env::var(key).ok())?;
        settings.validate()?;
        settings.ensure_directories()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Settings, RagError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| RagError::config_io(path.to_path_buf(), err))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Settings, RagError> {
        toml::from_str(raw).map_err(|err| RagError::InvalidConfiguration(err.to_string()))
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, RagError> {
    value
        .parse::<T>()
        .map_err(|_| RagError::InvalidConfiguration(format!("{key} has invalid value '{value}'")))
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key_env: String,
    pub base_url: String,
    /// Primary model for synthesis and the agent.
    pub model_id: String,
    /// Model used for classification/routing.
    pub router_model_id: String,
    pub default_temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model_id: "gpt-5.2-2025-12-11".to_string(),
            router_model_id: "gpt-5.2-2025-12-11".to_string(),
            default_temperature: 0.0,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    Openai,
    Fastembed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Openai,
            model: "text-embedding-3-large".to_string(),
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    Local,
    Qdrant,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    /// Lower distance = more similar; `None` disables the cutoff.
    pub max_distance: Option<f32>,
    pub backend: VectorBackend,
    pub collection: String,
    pub qdrant_url: String,
    pub qdrant_concurrency: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 10,
            max_distance: None,
            backend: VectorBackend::Local,
            collection: "jpmorgan_rag".to_string(),
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// `tokenizer.json` to count tokens with instead of the GPT-2 encoding.
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            chunk_overlap: 150,
            tokenizer_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub pdf_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            pdf_dir: PathBuf::from("data/pdfs"),
            index_dir: PathBuf::from("data/index"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub default_graph: String,
    /// Upper bound on model calls per agent turn.
    pub agent_max_steps: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_graph: "jpm_react_agent".to_string(),
            agent_max_steps: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointerKind {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for CheckpointerKind {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(RagError::InvalidConfiguration(format!(
                "Unknown checkpointer type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointerConfig {
    pub kind: CheckpointerKind,
    pub postgres_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
