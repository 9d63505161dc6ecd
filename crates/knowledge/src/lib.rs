//! Knowledge base storage and retrieval.
//!
//! Vector stores are pooled per `(knowledge base, embedding variant)` and
//! reached only through exclusive leases; [`KnowledgeBaseService`] builds the
//! knowledge base operations on top of that pool.

pub mod catalog;
pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod flat_index;
pub mod handle;
pub mod key;
pub mod pool;
pub mod service;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use catalog::{DocumentCatalog, KnowledgeFileRecord, SqliteCatalog};
pub use embeddings::{EmbeddingConfig, EmbeddingEngine, EmbeddingProvider};
pub use flat_index::{FlatBackend, FlatIndex};
pub use handle::{IndexHandle, IndexLease};
pub use key::IndexKey;
pub use pool::IndexPool;
pub use service::KnowledgeBaseService;
pub use types::{DocInfo, DocStatus, Document, KnowledgeBaseConfig, Metadata, SearchHit};
pub use vector_index::{VectorStore, VectorStoreBackend};
