//! Exclusive-access wrapper around one loaded vector store.

use crate::embeddings::EmbeddingProvider;
use crate::key::IndexKey;
use crate::vector_index::VectorStore;
use kbvault_core::AppResult;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// One vector store for one [`IndexKey`], plus the embedding provider it
/// was built with and the directory it persists to.
///
/// The store is only reachable through [`IndexHandle::acquire`], so at most
/// one operation touches it at any instant. Handles are shared as
/// `Arc<IndexHandle>`; a handle evicted from the pool stays usable by
/// whoever still holds it and is dropped with the last reference.
pub struct IndexHandle {
    key: IndexKey,
    vs_path: PathBuf,
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Mutex<Box<dyn VectorStore>>,
    retired: AtomicBool,
}

impl IndexHandle {
    pub fn new(
        key: IndexKey,
        vs_path: PathBuf,
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Box<dyn VectorStore>,
    ) -> Self {
        Self {
            key,
            vs_path,
            embeddings,
            store: Mutex::new(store),
            retired: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &IndexKey {
        &self.key
    }

    /// Snapshot directory this handle loads from and saves to.
    pub fn vs_path(&self) -> &Path {
        &self.vs_path
    }

    pub fn embeddings(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embeddings
    }

    /// Wait for exclusive access to the store.
    ///
    /// Access is released when the returned lease is dropped, whichever way
    /// the caller's scope is left. Dropping the future before it resolves
    /// gives up the place in the queue without taking the lease.
    pub async fn acquire(&self) -> IndexLease<'_> {
        let guard = self.store.lock().await;
        tracing::trace!("Lease acquired on {}", self.key);
        IndexLease {
            handle: self,
            guard,
        }
    }

    /// Mark the handle as detached from its snapshot directory.
    ///
    /// Set under the lease when the handle is removed from the pool and its
    /// directory handed to a successor. Later [`IndexLease::save`] calls
    /// become no-ops, and a caller that finds the flag set after acquiring
    /// should look the key up again.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Take the lease only if nobody holds it.
    pub fn try_acquire(&self) -> Option<IndexLease<'_>> {
        self.store.try_lock().ok().map(|guard| IndexLease {
            handle: self,
            guard,
        })
    }

    /// Serialize the current state into `path`, taking the lease for the
    /// duration of the write.
    pub async fn save(&self, path: &Path) -> AppResult<()> {
        self.acquire().await.save_to(path)
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("key", &self.key)
            .field("vs_path", &self.vs_path)
            .field("embeddings", &self.embeddings.model_name())
            .finish_non_exhaustive()
    }
}

/// Scoped exclusive access to an [`IndexHandle`]'s store.
pub struct IndexLease<'a> {
    handle: &'a IndexHandle,
    guard: MutexGuard<'a, Box<dyn VectorStore>>,
}

impl IndexLease<'_> {
    pub fn handle(&self) -> &IndexHandle {
        self.handle
    }

    /// Persist to the handle's own snapshot directory.
    ///
    /// Skipped for retired handles: the directory no longer belongs to them.
    pub fn save(&self) -> AppResult<()> {
        if self.handle.is_retired() {
            tracing::warn!(
                "Not saving retired vector store {} to {:?}",
                self.handle.key,
                self.handle.vs_path
            );
            return Ok(());
        }
        self.save_to(&self.handle.vs_path)
    }

    /// Persist to an arbitrary directory.
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        self.guard.save(path)?;
        tracing::debug!(
            "Saved vector store {} to {:?} ({} documents)",
            self.handle.key,
            path,
            self.guard.len()
        );
        Ok(())
    }
}

impl Deref for IndexLease<'_> {
    type Target = dyn VectorStore;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for IndexLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl Drop for IndexLease<'_> {
    fn drop(&mut self) {
        tracing::trace!("Lease released on {}", self.handle.key);
    }
}
