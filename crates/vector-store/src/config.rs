use crate::error::{Result, VectorStoreError};
use crate::snapshot::SNAPSHOT_FILE_NAME;
use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = "./data/vector_store";
pub const DEFAULT_MODEL_ID: &str = "all-minilm-l6-v2";
pub const DEFAULT_MODEL_DIR: &str = "./models";
pub const DEFAULT_DIMENSION: usize = 384;
pub const DEFAULT_TOP_K: usize = 3;

/// How the embedding backend is chosen when the store is constructed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingMode {
    /// ONNX model; construction fails if it cannot be loaded.
    Model,
    /// Deterministic hash embeddings. Search quality is degraded.
    Stub,
    /// Model when it loads, otherwise the stub.
    Auto,
}

impl EmbeddingMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "model" | "onnx" => Ok(Self::Model),
            "stub" | "fallback" => Ok(Self::Stub),
            "auto" => Ok(Self::Auto),
            other => Err(VectorStoreError::Config(format!(
                "Unsupported RAG_EMBEDDING_MODE '{other}' (expected 'model', 'stub' or 'auto')"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Stub => "stub",
            Self::Auto => "auto",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub model_id: String,
    pub model_dir: PathBuf,
    /// Dimension of the stub backend, also used when `Auto` falls back.
    pub dimension: usize,
    pub use_cuda: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::Model,
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            dimension: DEFAULT_DIMENSION,
            use_cuda: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub top_k: usize,
    pub embedding: EmbeddingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            top_k: DEFAULT_TOP_K,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Reads `RAG_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get("RAG_TOP_K") {
            config.top_k = parse_positive("RAG_TOP_K", &raw)?;
        }
        if let Some(raw) = get("RAG_EMBEDDING_MODE") {
            config.embedding.mode = EmbeddingMode::parse(&raw)?;
        }
        if let Some(model) = get("RAG_EMBEDDING_MODEL") {
            config.embedding.model_id = model.trim().to_string();
        }
        if let Some(dir) = get("RAG_MODEL_DIR") {
            config.embedding.model_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get("RAG_EMBEDDING_DIM") {
            config.embedding.dimension = parse_positive("RAG_EMBEDDING_DIM", &raw)?;
        }
        if let Some(raw) = get("RAG_USE_CUDA") {
            config.embedding.use_cuda = raw == "1" || raw.eq_ignore_ascii_case("true");
        }
        Ok(config)
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE_NAME)
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        Ok(_) => Err(VectorStoreError::Config(format!("{key} must be positive"))),
        Err(e) => Err(VectorStoreError::Config(format!("Invalid {key} '{raw}': {e}"))),
    }
}
