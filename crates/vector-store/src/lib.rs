//! # RAG Vector Store
//!
//! Embedding-indexed storage of document chunks for retrieval-augmented
//! generation.
//!
//! ## Features
//!
//! - **Exact cosine search** over a dense in-memory matrix
//! - **Pluggable embeddings**: ONNX sentence model, or a deterministic hash
//!   fallback when no model is installed
//! - **Atomic JSON snapshots** rewritten after every mutation
//! - **Single writer, many readers** around records and index
//!
//! ## Architecture
//!
//! ```text
//! add(group, texts, metadata)
//!     │
//!     ├──> EmbeddingProvider (ONNX / hash stub)
//!     │      └─> Vector[D]
//!     │
//!     ├──> SimilarityIndex (rebuilt in full)
//!     │      └─> Cosine ranking
//!     │
//!     └──> SnapshotFile
//!            └─> documents.json (temp file + rename)
//! ```
//!
//! The index is rebuilt from scratch on every mutation. That is fine for a few
//! thousand chunks; larger corpora need incremental or approximate indexing.
//!
//! ## Example
//!
//! ```no_run
//! use rag_vector_store::{ChunkStore, Metadata, StoreConfig};
//!
//! fn main() -> rag_vector_store::Result<()> {
//!     let store = ChunkStore::from_config(&StoreConfig::from_env()?)?;
//!
//!     let mut metadata = Metadata::new();
//!     metadata.insert("source".into(), "pets.txt".into());
//!     store.add("doc1", &["Cats are small.", "Dogs are loud."], metadata)?;
//!
//!     for hit in store.search("small feline", 3)? {
//!         println!("{:.3} {}", hit.similarity, hit.content);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod embeddings;
mod error;
mod index;
mod snapshot;
mod store;
mod types;

pub use config::{EmbeddingConfig, EmbeddingMode, StoreConfig, DEFAULT_TOP_K};
pub use embeddings::{build_provider, EmbeddingProvider, HashEmbedder, OnnxEmbedder};
pub use error::{Result, VectorStoreError};
pub use index::SimilarityIndex;
pub use snapshot::{SnapshotFile, SNAPSHOT_FILE_NAME};
pub use store::ChunkStore;
pub use types::{
    ChunkDetail, ChunkRecord, DocumentContent, GroupSummary, Metadata, SearchHit, StoreStatus,
    CHUNK_INDEX_KEY, SOURCE_KEY,
};
