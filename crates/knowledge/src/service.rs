//! Knowledge base operations on top of the index pool.
//!
//! Every operation that touches a vector store computes embeddings first,
//! then fetches the handle from the pool and keeps its lease only for the
//! in-memory mutation, catalog bookkeeping and the optional snapshot write.

use crate::catalog::{DocumentCatalog, KnowledgeFileRecord};
use crate::chunker;
use crate::config;
use crate::embeddings::{embed_all, EmbeddingEngine, EmbeddingProvider};
use crate::handle::{IndexHandle, IndexLease};
use crate::key::{variant_name, IndexKey};
use crate::pool::IndexPool;
use crate::types::{
    DocInfo, DocStatus, Document, KnowledgeBaseConfig, Metadata, SearchHit, SOURCE_KEY,
};
use crate::vector_index::VectorStore;
use kbvault_core::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// One knowledge base bound to one embedding model.
pub struct KnowledgeBaseService {
    config: KnowledgeBaseConfig,
    key: IndexKey,
    pool: Arc<IndexPool>,
    catalog: Arc<dyn DocumentCatalog>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeBaseService {
    /// Bind `config` to a pool, catalog and embedding provider.
    ///
    /// The vector store variant is `config.vector_name` when set, otherwise
    /// derived from the provider's model name.
    pub fn new(
        pool: Arc<IndexPool>,
        catalog: Arc<dyn DocumentCatalog>,
        config: KnowledgeBaseConfig,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> AppResult<Self> {
        config::validate_kb_name(&config.name)?;

        if config.vs_type != pool.backend().name() {
            return Err(AppError::Config(format!(
                "Knowledge base '{}' uses vector store type '{}', pool serves '{}'",
                config.name,
                config.vs_type,
                pool.backend().name()
            )));
        }

        let variant = config
            .vector_name
            .clone()
            .unwrap_or_else(|| variant_name(embeddings.model_name()));
        let key = IndexKey::new(config.name.clone(), variant);

        Ok(Self {
            config,
            key,
            pool,
            catalog,
            embeddings,
        })
    }

    /// Load `<kb_root>/<kb_name>/config.yaml` (or defaults) and resolve its
    /// embedding provider through `engine`.
    pub fn open(
        pool: Arc<IndexPool>,
        catalog: Arc<dyn DocumentCatalog>,
        engine: &EmbeddingEngine,
        kb_name: &str,
    ) -> AppResult<Self> {
        config::validate_kb_name(kb_name)?;
        let config = config::load_config(pool.kb_root(), kb_name)?;
        let embeddings = engine.provider_for(&config.embedding)?;
        Self::new(pool, catalog, config, embeddings)
    }

    pub fn kb_name(&self) -> &str {
        &self.config.name
    }

    pub fn key(&self) -> &IndexKey {
        &self.key
    }

    pub fn config(&self) -> &KnowledgeBaseConfig {
        &self.config
    }

    pub fn kb_path(&self) -> PathBuf {
        config::get_kb_path(self.pool.kb_root(), self.kb_name())
    }

    pub fn content_path(&self) -> PathBuf {
        config::get_content_path(self.pool.kb_root(), self.kb_name())
    }

    pub fn vs_path(&self) -> PathBuf {
        config::get_vs_path(self.pool.kb_root(), self.kb_name(), self.key.variant())
    }

    /// Whether the knowledge base directory exists.
    pub fn exists(&self) -> bool {
        self.kb_path().is_dir()
    }

    fn ensure_exists(&self) -> AppResult<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Knowledge base '{}' does not exist",
                self.kb_name()
            )))
        }
    }

    async fn handle(&self) -> AppResult<Arc<IndexHandle>> {
        self.pool
            .load(&self.key, Arc::clone(&self.embeddings))
            .await
    }

    /// Run `op` under the lease of the handle currently installed for this
    /// key.
    ///
    /// A handle retired by [`Self::clear`] or [`Self::drop_kb`] while we
    /// queued for its lease is never handed to `op`; the pool is asked again
    /// and `op` runs against the replacement.
    async fn with_lease<T>(
        &self,
        mut op: impl FnMut(&mut IndexLease<'_>) -> AppResult<T>,
    ) -> AppResult<T> {
        loop {
            let handle = self.handle().await?;
            let mut lease = handle.acquire().await;
            if !handle.is_retired() {
                return op(&mut lease);
            }
            drop(lease);

            tracing::debug!("{} was retired while waiting for its lease", self.key);
            self.ensure_exists()?;
        }
    }

    /// Detach `handle` from the pool and stop it writing its directory.
    fn detach(&self, handle: &IndexHandle) {
        if !self.pool.remove_handle(handle) {
            tracing::debug!("{} was already replaced in the pool", handle.key());
        }
        handle.retire();
    }

    /// Create the directory layout, register the base and write an empty
    /// snapshot when none exists yet. Safe to call on an existing base.
    pub async fn create(&self) -> AppResult<()> {
        fs::create_dir_all(self.content_path())?;
        fs::create_dir_all(self.vs_path())?;

        if !config::get_config_path(self.pool.kb_root(), self.kb_name()).exists() {
            config::save_config(self.pool.kb_root(), &self.config)?;
        }

        self.catalog.register_kb(
            self.kb_name(),
            &self.config.vs_type,
            self.embeddings.model_name(),
        )?;

        let backend = self.pool.backend();
        self.with_lease(|lease| {
            if !backend.exists(lease.handle().vs_path()) {
                lease.save()?;
            }
            Ok(())
        })
        .await?;

        tracing::info!("Created knowledge base '{}' ({})", self.kb_name(), self.key);
        Ok(())
    }

    /// Nearest documents to `query`, most similar first.
    ///
    /// Only hits with `score >= score_threshold` are returned.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> AppResult<Vec<SearchHit>> {
        self.ensure_exists()?;

        let query_embedding = embed_all(self.embeddings.as_ref(), &[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| AppError::Embedding("No embedding returned for query".to_string()))?;

        let hits = self
            .with_lease(|lease| lease.search(&query_embedding, top_k, score_threshold))
            .await?;

        tracing::debug!(
            "Search in '{}' returned {} hits (top_k: {}, threshold: {})",
            self.kb_name(),
            hits.len(),
            top_k,
            score_threshold
        );
        Ok(hits)
    }

    /// [`Self::search`] with the base's configured `top_k` and threshold.
    pub async fn search_default(&self, query: &str) -> AppResult<Vec<SearchHit>> {
        self.search(query, self.config.top_k, self.config.score_threshold)
            .await
    }

    /// Embed and insert `docs`, returning one [`DocInfo`] per input document
    /// in input order.
    ///
    /// Embedding happens before the lease is taken; a failure leaves the
    /// store untouched. With `persist` the snapshot is written before the
    /// lease is released.
    pub async fn add_documents(&self, docs: &[Document], persist: bool) -> AppResult<Vec<DocInfo>> {
        self.ensure_exists()?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let batch = EmbeddedBatch::embed(self.embeddings.as_ref(), docs).await?;

        let infos = self
            .with_lease(|lease| {
                let infos = batch.insert(&mut **lease)?;
                if persist {
                    lease.save()?;
                }
                Ok(infos)
            })
            .await?;

        tracing::info!(
            "Added {} documents to '{}'{}",
            infos.len(),
            self.kb_name(),
            if persist { "" } else { " (not persisted)" }
        );
        Ok(infos)
    }

    /// Remove every document whose `source` equals `file_name`, ignoring
    /// case. Returns the removed identifiers; no match is not an error.
    ///
    /// With `persist` the snapshot is written even when nothing matched, so
    /// earlier unsaved changes reach disk as well.
    pub async fn delete_by_source(&self, file_name: &str, persist: bool) -> AppResult<Vec<String>> {
        self.ensure_exists()?;

        let ids = self
            .with_lease(|lease| {
                let ids = remove_source(&mut **lease, file_name)?;
                if persist {
                    lease.save()?;
                }
                Ok(ids)
            })
            .await?;

        tracing::info!(
            "Deleted {} documents with source '{}' from '{}'",
            ids.len(),
            file_name,
            self.kb_name()
        );
        Ok(ids)
    }

    /// Remove documents by identifier. Unknown identifiers are ignored.
    ///
    /// The snapshot is not written; call [`Self::save_vector_store`].
    pub async fn delete_by_ids(&self, ids: &[String]) -> AppResult<usize> {
        self.ensure_exists()?;
        let removed = self.with_lease(|lease| lease.delete(ids)).await?;
        tracing::debug!("Deleted {} of {} ids from '{}'", removed, ids.len(), self.kb_name());
        Ok(removed)
    }

    /// Look up stored documents; unknown identifiers are skipped.
    pub async fn get_docs_by_ids(&self, ids: &[String]) -> AppResult<Vec<Document>> {
        self.ensure_exists()?;
        self.with_lease(|lease| Ok(lease.get(ids))).await
    }

    /// Number of documents in the store.
    pub async fn count_docs(&self) -> AppResult<usize> {
        self.ensure_exists()?;
        self.with_lease(|lease| Ok(lease.len())).await
    }

    /// Write the current snapshot.
    pub async fn save_vector_store(&self) -> AppResult<()> {
        self.ensure_exists()?;
        self.with_lease(|lease| lease.save()).await
    }

    /// Empty this variant's vector store and forget every recorded file.
    ///
    /// The snapshot directory is emptied while the installed handle's lease
    /// is held, then the handle is detached and retired. Callers queued on
    /// the old handle move to a fresh, empty one. A snapshot that cannot be
    /// loaded is cleared from disk all the same. Filesystem cleanup failures
    /// are logged, not returned.
    pub async fn clear(&self) -> AppResult<()> {
        let vs_path = self.vs_path();

        let cleared = self
            .with_lease(|lease| {
                reset_dir(&vs_path)?;
                self.detach(lease.handle());
                Ok(())
            })
            .await;

        match cleared {
            Ok(()) => {}
            Err(AppError::Construction(e)) => {
                tracing::warn!("Clearing {} without loading it: {}", self.key, e);
                reset_dir(&vs_path)?;
            }
            Err(e) => return Err(e),
        }

        self.catalog.forget_files(self.kb_name())?;

        tracing::info!("Cleared vector store {}", self.key);
        Ok(())
    }

    /// Delete the knowledge base: every pooled variant, its directory and
    /// its catalog records.
    ///
    /// The leases of all pooled variants are held while the directory is
    /// removed; operations queued on them then fail with `NotFound`.
    pub async fn drop_kb(&self) -> AppResult<()> {
        let mut handles = Vec::new();
        match self.handle().await {
            Ok(handle) => handles.push(handle),
            Err(e) => tracing::debug!("Dropping {} without loading it: {}", self.key, e),
        }
        handles.extend(
            self.pool
                .keys()
                .into_iter()
                .filter(|key| key.kb_name() == self.kb_name() && *key != self.key)
                .filter_map(|key| self.pool.get(&key)),
        );
        // One global order keeps concurrent drops from deadlocking
        handles.sort_by(|a, b| a.key().cmp(b.key()));

        let mut leases = Vec::with_capacity(handles.len());
        for handle in &handles {
            leases.push(handle.acquire().await);
        }

        remove_dir_logged(&self.kb_path());
        for handle in &handles {
            self.detach(handle);
        }
        drop(leases);

        self.catalog.forget_kb(self.kb_name())?;

        tracing::info!("Dropped knowledge base '{}'", self.kb_name());
        Ok(())
    }

    /// Whether `file_name` is embedded, only sitting in `content/`, or unknown.
    pub fn exist_doc(&self, file_name: &str) -> AppResult<DocStatus> {
        if self.catalog.file_exists(self.kb_name(), file_name)? {
            return Ok(DocStatus::InIndex);
        }
        if self.content_path().join(file_name).is_file() {
            return Ok(DocStatus::OnDiskOnly);
        }
        Ok(DocStatus::Absent)
    }

    /// Replace the documents of `file_name` with `docs` and record the file.
    ///
    /// Documents without a `source` get `file_name`. Insertion, the catalog
    /// record and removal of the old documents happen under one lease; if
    /// the catalog rejects the record the inserted documents are taken out
    /// again and the previous ones stay.
    pub async fn add_file(
        &self,
        file_name: &str,
        docs: &[Document],
        persist: bool,
    ) -> AppResult<Vec<DocInfo>> {
        self.ensure_exists()?;

        let docs: Vec<Document> = docs
            .iter()
            .cloned()
            .map(|mut doc| {
                if doc.source().is_none() {
                    doc.metadata.insert(
                        SOURCE_KEY.to_string(),
                        serde_json::Value::String(file_name.to_string()),
                    );
                }
                doc
            })
            .collect();

        let batch = EmbeddedBatch::embed(self.embeddings.as_ref(), &docs).await?;

        let (infos, replaced) = self
            .with_lease(|lease| {
                let replaced = source_ids(&**lease, file_name);
                let infos = batch.insert(&mut **lease)?;

                if let Err(e) = self.catalog.record_file(self.kb_name(), file_name, &infos) {
                    let added: Vec<String> = infos.iter().map(|info| info.id.clone()).collect();
                    lease.delete(&added)?;
                    return Err(e);
                }

                if !replaced.is_empty() {
                    lease.delete(&replaced)?;
                }
                if persist {
                    lease.save()?;
                }
                Ok((infos, replaced.len()))
            })
            .await?;

        tracing::info!(
            "Indexed '{}' into '{}': {} documents ({} replaced)",
            file_name,
            self.kb_name(),
            infos.len(),
            replaced
        );
        Ok(infos)
    }

    /// Remove the documents of `file_name` and its catalog record.
    ///
    /// The record is dropped first; if that fails the store is untouched.
    pub async fn delete_file(&self, file_name: &str, persist: bool) -> AppResult<Vec<String>> {
        self.ensure_exists()?;

        let ids = self
            .with_lease(|lease| {
                self.catalog.forget_file(self.kb_name(), file_name)?;
                let ids = remove_source(&mut **lease, file_name)?;
                if persist {
                    lease.save()?;
                }
                Ok(ids)
            })
            .await?;

        tracing::info!(
            "Removed '{}' from '{}' ({} documents)",
            file_name,
            self.kb_name(),
            ids.len()
        );
        Ok(ids)
    }

    /// Chunk `content/<file_name>` with the base's chunk settings and index
    /// it through [`Self::add_file`], persisting the snapshot.
    pub async fn ingest_content_file(&self, file_name: &str) -> AppResult<Vec<DocInfo>> {
        self.ensure_exists()?;
        let path = self.content_path().join(file_name);
        if !path.is_file() {
            return Err(AppError::NotFound(format!(
                "File '{}' not found in {:?}",
                file_name,
                self.content_path()
            )));
        }

        let text = fs::read_to_string(&path)?;
        let docs = chunker::documents_from_text(
            file_name,
            &text,
            self.config.chunk_size,
            self.config.chunk_overlap,
        );
        self.add_file(file_name, &docs, true).await
    }

    /// Files under `content/`, relative and `/`-separated, sorted.
    pub fn list_content_files(&self) -> AppResult<Vec<String>> {
        self.ensure_exists()?;
        let content = self.content_path();
        if !content.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&content).follow_links(true) {
            let entry = entry.map_err(|e| {
                AppError::Knowledge(format!("Failed to walk {:?}: {}", content, e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&content) {
                let name: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(name.join("/"));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Files recorded in the catalog for this base.
    pub fn list_files(&self) -> AppResult<Vec<KnowledgeFileRecord>> {
        self.catalog.list_files(self.kb_name())
    }
}

impl std::fmt::Debug for KnowledgeBaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBaseService")
            .field("key", &self.key)
            .field("embeddings", &self.embeddings.model_name())
            .finish_non_exhaustive()
    }
}

/// Documents with their embeddings, computed before any lease is taken.
struct EmbeddedBatch {
    texts: Vec<String>,
    metadatas: Vec<Metadata>,
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddedBatch {
    async fn embed(provider: &dyn EmbeddingProvider, docs: &[Document]) -> AppResult<Self> {
        let texts: Vec<String> = docs.iter().map(|d| d.page_content.clone()).collect();
        let metadatas: Vec<Metadata> = docs.iter().map(|d| d.metadata.clone()).collect();
        let embeddings = embed_all(provider, &texts).await?;
        Ok(Self {
            texts,
            metadatas,
            embeddings,
        })
    }

    fn insert(&self, store: &mut dyn VectorStore) -> AppResult<Vec<DocInfo>> {
        let ids = store.add(&self.texts, &self.embeddings, &self.metadatas)?;
        Ok(ids
            .into_iter()
            .zip(self.metadatas.iter().cloned())
            .map(|(id, metadata)| DocInfo { id, metadata })
            .collect())
    }
}

/// Ids of documents whose `source` equals `file_name` case-insensitively.
fn source_ids(store: &dyn VectorStore, file_name: &str) -> Vec<String> {
    let target = file_name.to_lowercase();
    store.ids_where_source(&|source: &str| source.to_lowercase() == target)
}

fn remove_source(store: &mut dyn VectorStore, file_name: &str) -> AppResult<Vec<String>> {
    let ids = source_ids(store, file_name);
    if !ids.is_empty() {
        store.delete(&ids)?;
    }
    Ok(ids)
}

fn remove_dir_logged(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => tracing::debug!("Removed {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
    }
}

/// Empty `path`, leaving the directory itself in place.
fn reset_dir(path: &Path) -> AppResult<()> {
    remove_dir_logged(path);
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::embeddings::providers::trigram::TrigramProvider;
    use crate::flat_index::FlatBackend;
    use tempfile::TempDir;

    fn service(root: &Path, name: &str) -> KnowledgeBaseService {
        let pool = Arc::new(IndexPool::new(root, Arc::new(FlatBackend)));
        let catalog: Arc<dyn DocumentCatalog> = Arc::new(SqliteCatalog::in_memory().unwrap());
        let config = KnowledgeBaseConfig {
            name: name.to_string(),
            ..Default::default()
        };
        KnowledgeBaseService::new(pool, catalog, config, Arc::new(TrigramProvider::new(64)))
            .unwrap()
    }

    #[test]
    fn test_variant_derived_from_model() {
        let temp = TempDir::new().unwrap();
        let service = service(temp.path(), "samples");
        assert_eq!(service.key().kb_name(), "samples");
        assert_eq!(service.key().variant(), "trigram_v1");
    }

    #[test]
    fn test_explicit_vector_name_wins() {
        let temp = TempDir::new().unwrap();
        let pool = Arc::new(IndexPool::new(temp.path(), Arc::new(FlatBackend)));
        let catalog: Arc<dyn DocumentCatalog> = Arc::new(SqliteCatalog::in_memory().unwrap());
        let config = KnowledgeBaseConfig {
            name: "samples".to_string(),
            vector_name: Some("custom".to_string()),
            ..Default::default()
        };
        let service =
            KnowledgeBaseService::new(pool, catalog, config, Arc::new(TrigramProvider::new(8)))
                .unwrap();
        assert_eq!(service.key().variant(), "custom");
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let temp = TempDir::new().unwrap();
        let pool = Arc::new(IndexPool::new(temp.path(), Arc::new(FlatBackend)));
        let catalog: Arc<dyn DocumentCatalog> = Arc::new(SqliteCatalog::in_memory().unwrap());
        let config = KnowledgeBaseConfig {
            name: "samples".to_string(),
            vs_type: "faiss".to_string(),
            ..Default::default()
        };
        let result =
            KnowledgeBaseService::new(pool, catalog, config, Arc::new(TrigramProvider::new(8)));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_operations_on_missing_base_are_not_found() {
        let temp = TempDir::new().unwrap();
        let service = service(temp.path(), "missing");

        let err = service.search("anything", 3, 0.0).await.unwrap_err();
        assert!(err.is_not_found());
        let err = service
            .add_documents(&[Document::new("x", "a.txt")], true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_writes_layout() {
        let temp = TempDir::new().unwrap();
        let service = service(temp.path(), "samples");
        service.create().await.unwrap();

        assert!(service.content_path().is_dir());
        assert!(service.vs_path().join("index.json").is_file());
        assert!(config::get_config_path(temp.path(), "samples").is_file());

        // Idempotent
        service.create().await.unwrap();
        assert_eq!(service.count_docs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_without_persist_leaves_snapshot_alone() {
        let temp = TempDir::new().unwrap();
        let service = service(temp.path(), "samples");
        service.create().await.unwrap();

        service
            .add_documents(&[Document::new("hello world", "a.txt")], false)
            .await
            .unwrap();
        assert_eq!(service.count_docs().await.unwrap(), 1);
        assert_eq!(
            crate::flat_index::FlatIndex::load(&service.vs_path())
                .unwrap()
                .len(),
            0
        );

        service.save_vector_store().await.unwrap();
        assert_eq!(
            crate::flat_index::FlatIndex::load(&service.vs_path())
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_by_ids_and_get() {
        let temp = TempDir::new().unwrap();
        let service = service(temp.path(), "samples");
        service.create().await.unwrap();

        let infos = service
            .add_documents(
                &[Document::new("alpha", "a.txt"), Document::new("beta", "b.txt")],
                true,
            )
            .await
            .unwrap();
        let ids: Vec<String> = infos.iter().map(|i| i.id.clone()).collect();

        let docs = service.get_docs_by_ids(&ids).await.unwrap();
        assert_eq!(docs.len(), 2);

        let removed = service
            .delete_by_ids(&[ids[0].clone(), "unknown".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(service.count_docs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_content_files() {
        let temp = TempDir::new().unwrap();
        let service = service(temp.path(), "samples");
        service.create().await.unwrap();

        fs::create_dir_all(service.content_path().join("sub")).unwrap();
        fs::write(service.content_path().join("b.txt"), "b").unwrap();
        fs::write(service.content_path().join("sub/a.md"), "a").unwrap();

        assert_eq!(
            service.list_content_files().unwrap(),
            vec!["b.txt".to_string(), "sub/a.md".to_string()]
        );
    }
}
