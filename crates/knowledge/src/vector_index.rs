//! Vector store abstraction.
//!
//! The pool and lease protocol only ever talk to these two traits, so a
//! different backend can be dropped in without touching them.

use crate::types::{Document, Metadata, SearchHit};
use kbvault_core::AppResult;
use std::path::Path;

/// A loaded, mutable vector store.
///
/// Implementations are not expected to be safe for concurrent mutation;
/// callers reach them only through an [`crate::handle::IndexLease`].
pub trait VectorStore: Send + Sync {
    /// Dimension of the stored vectors.
    fn dimensions(&self) -> usize;

    /// Number of stored documents.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert texts with precomputed embeddings.
    ///
    /// Returns the assigned identifiers in input order. All three slices
    /// have the same length.
    fn add(
        &mut self,
        texts: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> AppResult<Vec<String>>;

    /// Remove documents by identifier. Unknown identifiers are ignored.
    ///
    /// Returns how many documents were removed.
    fn delete(&mut self, ids: &[String]) -> AppResult<usize>;

    /// Top-k documents by descending similarity, keeping only those with
    /// `score >= score_threshold`.
    fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> AppResult<Vec<SearchHit>>;

    /// Look up stored documents. Unknown identifiers are skipped.
    fn get(&self, ids: &[String]) -> Vec<Document>;

    /// Identifiers of every document whose `source` metadata satisfies `matches`.
    fn ids_where_source(&self, matches: &dyn Fn(&str) -> bool) -> Vec<String>;

    /// Persist the current state into `dir`.
    fn save(&self, dir: &Path) -> AppResult<()>;
}

/// Factory for one kind of vector store.
pub trait VectorStoreBackend: Send + Sync {
    /// Backend identifier, as used in `vs_type`.
    fn name(&self) -> &str;

    /// Whether `dir` holds a snapshot this backend can load.
    fn exists(&self, dir: &Path) -> bool;

    /// Restore a store from a snapshot directory.
    fn load(&self, dir: &Path) -> AppResult<Box<dyn VectorStore>>;

    /// Create an empty store for vectors of the given dimension.
    fn create(&self, dimensions: usize) -> Box<dyn VectorStore>;
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
