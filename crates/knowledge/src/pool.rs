//! Process-wide registry of loaded vector stores.
//!
//! The registry maps [`IndexKey`] to a slot holding a once-initialized
//! [`IndexHandle`]. The registry lock is held only to look up, insert or
//! remove slots; construction itself runs outside it, so loading one key
//! never serializes loads of unrelated keys. Racers on the same missing key
//! all wait on the same slot and at most one of them builds the handle.

use crate::config;
use crate::embeddings::EmbeddingProvider;
use crate::handle::IndexHandle;
use crate::key::IndexKey;
use crate::vector_index::VectorStoreBackend;
use kbvault_core::{AppError, AppResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;

/// Text embedded once at construction to check the provider is usable.
const PROBE_TEXT: &str = "init";

type Slot = Arc<OnceCell<Arc<IndexHandle>>>;

/// Keyed cache of [`IndexHandle`]s.
pub struct IndexPool {
    kb_root: PathBuf,
    backend: Arc<dyn VectorStoreBackend>,
    entries: Mutex<HashMap<IndexKey, Slot>>,
    constructions: AtomicUsize,
}

impl IndexPool {
    /// Create an empty pool whose snapshots live under `kb_root`.
    pub fn new(kb_root: impl Into<PathBuf>, backend: Arc<dyn VectorStoreBackend>) -> Self {
        Self {
            kb_root: kb_root.into(),
            backend,
            entries: Mutex::new(HashMap::new()),
            constructions: AtomicUsize::new(0),
        }
    }

    pub fn kb_root(&self) -> &Path {
        &self.kb_root
    }

    pub fn backend(&self) -> &dyn VectorStoreBackend {
        self.backend.as_ref()
    }

    // Slots are only inserted or removed whole, so a panic elsewhere cannot
    // leave the map inconsistent.
    fn registry(&self) -> MutexGuard<'_, HashMap<IndexKey, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the handle for `key`, building it on first use.
    ///
    /// Building restores the snapshot under
    /// `<kb_root>/<kb>/vector_store/<variant>/` when one exists and otherwise
    /// creates an empty store sized to `embeddings`. Concurrent callers for
    /// the same key share one construction and receive the same `Arc`.
    ///
    /// A failed construction installs nothing; the next call retries.
    pub async fn load(
        &self,
        key: &IndexKey,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> AppResult<Arc<IndexHandle>> {
        let slot = {
            let mut entries = self.registry();
            Arc::clone(
                entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        match slot
            .get_or_try_init(|| self.construct(key, embeddings))
            .await
        {
            Ok(handle) => Ok(Arc::clone(handle)),
            Err(e) => {
                self.discard_failed_slot(key, &slot);
                Err(e)
            }
        }
    }

    /// Drop an empty slot nobody else is waiting on.
    ///
    /// Slot clones are only handed out under the registry lock, so a strong
    /// count of two (map plus ours) means no other caller can still be
    /// initializing it.
    fn discard_failed_slot(&self, key: &IndexKey, slot: &Slot) {
        let mut entries = self.registry();
        let removable = entries.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if removable {
            entries.remove(key);
        }
    }

    async fn construct(
        &self,
        key: &IndexKey,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> AppResult<Arc<IndexHandle>> {
        let vs_path = config::get_vs_path(&self.kb_root, key.kb_name(), key.variant());

        let probe = embeddings.embed(PROBE_TEXT).await.map_err(|e| {
            AppError::Construction(format!(
                "Embedding model '{}' unusable for {}: {}",
                embeddings.model_name(),
                key,
                e
            ))
        })?;
        if probe.is_empty() || probe.len() != embeddings.dimensions() {
            return Err(AppError::Construction(format!(
                "Embedding model '{}' returned {} dimensions, declared {}",
                embeddings.model_name(),
                probe.len(),
                embeddings.dimensions()
            )));
        }

        let store = if self.backend.exists(&vs_path) {
            let backend = Arc::clone(&self.backend);
            let path = vs_path.clone();
            let store = tokio::task::spawn_blocking(move || backend.load(&path))
                .await
                .map_err(|e| AppError::Construction(format!("Snapshot loader panicked: {}", e)))?
                .map_err(|e| {
                    AppError::Construction(format!(
                        "Failed to restore {} from {:?}: {}",
                        key, vs_path, e
                    ))
                })?;

            if store.dimensions() != probe.len() {
                return Err(AppError::Construction(format!(
                    "Snapshot for {} has dimension {}, embedding model '{}' produces {}",
                    key,
                    store.dimensions(),
                    embeddings.model_name(),
                    probe.len()
                )));
            }

            tracing::info!(
                "Restored vector store {} from {:?} ({} documents)",
                key,
                vs_path,
                store.len()
            );
            store
        } else {
            tracing::info!(
                "Created empty {} vector store {} (dimension {})",
                self.backend.name(),
                key,
                probe.len()
            );
            self.backend.create(probe.len())
        };

        self.constructions.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(IndexHandle::new(
            key.clone(),
            vs_path,
            embeddings,
            store,
        )))
    }

    /// Detach the entry for `key` and hand it to the caller.
    ///
    /// Disk contents are left alone and outstanding leases are not waited
    /// for. A key still under construction is detached as well, but reported
    /// as [`AppError::NotFound`] because there is no handle to return yet.
    pub fn remove(&self, key: &IndexKey) -> AppResult<Arc<IndexHandle>> {
        let slot = self.registry().remove(key);
        match slot.as_ref().and_then(|s| s.get()) {
            Some(handle) => {
                tracing::debug!("Removed {} from index pool", key);
                Ok(Arc::clone(handle))
            }
            None => Err(AppError::NotFound(format!("No loaded index for {}", key))),
        }
    }

    /// Detach `handle` only if it is still the one installed under its key.
    ///
    /// Returns whether anything was removed. A replacement installed by
    /// someone else is left in place.
    pub fn remove_handle(&self, handle: &IndexHandle) -> bool {
        let mut entries = self.registry();
        let installed = entries
            .get(handle.key())
            .and_then(|slot| slot.get())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), handle));
        if installed {
            entries.remove(handle.key());
            tracing::debug!("Removed {} from index pool", handle.key());
        }
        installed
    }

    /// The installed handle for `key`, without building one.
    pub fn get(&self, key: &IndexKey) -> Option<Arc<IndexHandle>> {
        self.registry()
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    /// Whether a finished handle is installed for `key`.
    pub fn contains(&self, key: &IndexKey) -> bool {
        self.registry()
            .get(key)
            .is_some_and(|slot| slot.initialized())
    }

    /// Keys with a finished handle, sorted.
    pub fn keys(&self) -> Vec<IndexKey> {
        let mut keys: Vec<IndexKey> = self
            .registry()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of finished handles.
    pub fn len(&self) -> usize {
        self.registry()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many handles this pool has built so far.
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Snapshot every installed handle to its own directory.
    ///
    /// Handles are collected first so the registry lock is never held while
    /// waiting for a lease.
    pub async fn save_all(&self) -> AppResult<()> {
        let handles: Vec<Arc<IndexHandle>> = self
            .registry()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect();

        for handle in handles {
            handle.acquire().await.save()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for IndexPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexPool")
            .field("kb_root", &self.kb_root)
            .field("backend", &self.backend.name())
            .field("keys", &self.keys())
            .finish()
    }
}
