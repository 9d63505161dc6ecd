//! Cross-module tests for the index pool and knowledge base service.

mod pool_concurrency;

use crate::catalog::{DocumentCatalog, KnowledgeFileRecord, SqliteCatalog};
use crate::embeddings::EmbeddingProvider;
use crate::embeddings::providers::trigram::TrigramProvider;
use crate::types::DocInfo;
use kbvault_core::{AppError, AppResult};
use std::sync::Arc;
use tokio::sync::Notify;

/// Marker that makes [`FlakyProvider`] reject a batch.
pub(crate) const FAIL_MARKER: &str = "FAIL";

/// Trigram embeddings, except for batches containing [`FAIL_MARKER`].
#[derive(Debug)]
pub(crate) struct FlakyProvider {
    inner: TrigramProvider,
}

impl FlakyProvider {
    pub(crate) fn new(dimensions: usize) -> Self {
        Self {
            inner: TrigramProvider::new(dimensions),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FlakyProvider {
    fn provider_name(&self) -> &str {
        "flaky"
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if let Some(pos) = texts.iter().position(|t| t.contains(FAIL_MARKER)) {
            return Err(AppError::Embedding(format!("Rejected text #{}", pos + 1)));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Provider whose every call fails.
#[derive(Debug)]
pub(crate) struct BrokenProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for BrokenProvider {
    fn provider_name(&self) -> &str {
        "broken"
    }

    fn model_name(&self) -> &str {
        "broken"
    }

    fn dimensions(&self) -> usize {
        8
    }

    async fn embed_batch(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Err(AppError::Embedding("Model not loaded".to_string()))
    }
}

/// Trigram provider that waits for a permit before each batch.
#[derive(Debug)]
pub(crate) struct GatedProvider {
    inner: TrigramProvider,
    gate: Arc<Notify>,
}

impl GatedProvider {
    pub(crate) fn new(dimensions: usize, gate: Arc<Notify>) -> Self {
        Self {
            inner: TrigramProvider::new(dimensions),
            gate,
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for GatedProvider {
    fn provider_name(&self) -> &str {
        "gated"
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.gate.notified().await;
        self.inner.embed_batch(texts).await
    }
}

/// In-memory catalog that refuses to record files.
pub(crate) struct ReadOnlyCatalog {
    inner: SqliteCatalog,
}

impl ReadOnlyCatalog {
    pub(crate) fn new() -> Self {
        Self {
            inner: SqliteCatalog::in_memory().unwrap(),
        }
    }
}

impl DocumentCatalog for ReadOnlyCatalog {
    fn register_kb(&self, kb_name: &str, vs_type: &str, embed_model: &str) -> AppResult<()> {
        self.inner.register_kb(kb_name, vs_type, embed_model)
    }

    fn forget_kb(&self, kb_name: &str) -> AppResult<()> {
        self.inner.forget_kb(kb_name)
    }

    fn kb_exists(&self, kb_name: &str) -> AppResult<bool> {
        self.inner.kb_exists(kb_name)
    }

    fn record_file(&self, _kb_name: &str, file_name: &str, _docs: &[DocInfo]) -> AppResult<()> {
        Err(AppError::Knowledge(format!(
            "Catalog is read-only, cannot record '{}'",
            file_name
        )))
    }

    fn forget_file(&self, kb_name: &str, file_name: &str) -> AppResult<()> {
        self.inner.forget_file(kb_name, file_name)
    }

    fn forget_files(&self, kb_name: &str) -> AppResult<()> {
        self.inner.forget_files(kb_name)
    }

    fn file_exists(&self, kb_name: &str, file_name: &str) -> AppResult<bool> {
        self.inner.file_exists(kb_name, file_name)
    }

    fn list_files(&self, kb_name: &str) -> AppResult<Vec<KnowledgeFileRecord>> {
        self.inner.list_files(kb_name)
    }

    fn doc_ids_for_file(&self, kb_name: &str, file_name: &str) -> AppResult<Vec<String>> {
        self.inner.doc_ids_for_file(kb_name, file_name)
    }
}
