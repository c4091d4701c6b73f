mod onnx;
mod stub;

pub use onnx::OnnxEmbedder;
pub use stub::HashEmbedder;

use crate::config::{EmbeddingConfig, EmbeddingMode};
use crate::error::{Result, VectorStoreError};
use std::sync::Arc;

/// Turns text into a fixed-dimension vector.
///
/// Implementations are chosen once, when the store is built. Every vector an
/// implementation returns must have exactly [`dimension`](Self::dimension)
/// entries.
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// True when vectors are reproducible but carry no semantic meaning.
    fn is_degraded(&self) -> bool {
        false
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

/// Builds the provider selected by `config.mode`.
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.mode {
        EmbeddingMode::Stub => {
            log::warn!(
                "Using stub embeddings (dim {}); search results are not semantic",
                config.dimension
            );
            Ok(Arc::new(HashEmbedder::new(config.dimension)?))
        }
        EmbeddingMode::Model => Ok(Arc::new(OnnxEmbedder::load(config)?)),
        EmbeddingMode::Auto => match OnnxEmbedder::load(config) {
            Ok(model) => Ok(Arc::new(model)),
            Err(err @ VectorStoreError::ProviderUnavailable(_)) => {
                log::warn!(
                    "Embedding model '{}' unavailable, falling back to stub embeddings: {err}",
                    config.model_id
                );
                Ok(Arc::new(HashEmbedder::new(config.dimension)?))
            }
            Err(err) => Err(err),
        },
    }
}

pub(crate) fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}
