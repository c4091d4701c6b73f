use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Corrupt snapshot {}: {reason}", path.display())]
    CorruptPersistence { path: PathBuf, reason: String },

    #[error("Failed to write snapshot {}: {source}", path.display())]
    PersistenceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl VectorStoreError {
    /// True for malformed input rejected before any mutation.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidDimension { .. })
    }

    pub(crate) fn provider(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable(message.into())
    }
}
