//! Embedding engine for knowledge bases.
//!
//! Provides provider-agnostic embedding generation. Providers are cached per
//! `(provider, model)` pair so every knowledge base using the same model
//! shares one client.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};

use kbvault_core::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Process-wide cache of embedding providers.
#[derive(Default)]
pub struct EmbeddingEngine {
    providers: RwLock<HashMap<(String, String), Arc<dyn EmbeddingProvider>>>,
}

impl EmbeddingEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the provider for a configuration.
    pub fn provider_for(&self, config: &EmbeddingConfig) -> AppResult<Arc<dyn EmbeddingProvider>> {
        let cache_key = (config.provider.clone(), config.model.clone());

        {
            let providers = self
                .providers
                .read()
                .map_err(|_| AppError::Other("embedding provider cache poisoned".to_string()))?;
            if let Some(provider) = providers.get(&cache_key) {
                return Ok(Arc::clone(provider));
            }
        }

        tracing::debug!(
            "Creating embedding provider: provider={}, model={}, dimensions={}",
            config.provider,
            config.model,
            config.dimensions
        );

        let provider = create_provider(config)?;

        let mut providers = self
            .providers
            .write()
            .map_err(|_| AppError::Other("embedding provider cache poisoned".to_string()))?;
        // A concurrent caller may have inserted first; keep theirs.
        let entry = providers.entry(cache_key).or_insert(provider);
        Ok(Arc::clone(entry))
    }
}

/// Embed every text or fail as a whole.
///
/// Any provider failure, or a provider returning the wrong number of
/// vectors, is reported as [`AppError::Embedding`].
pub async fn embed_all(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> AppResult<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    tracing::debug!(
        "Embedding {} texts using provider '{}' (model: {})",
        texts.len(),
        provider.provider_name(),
        provider.model_name()
    );

    let embeddings = provider.embed_batch(texts).await.map_err(|e| match e {
        AppError::Embedding(msg) => AppError::Embedding(msg),
        other => AppError::Embedding(other.to_string()),
    })?;

    if embeddings.len() != texts.len() {
        return Err(AppError::Embedding(format!(
            "Provider '{}' returned {} embeddings for {} texts",
            provider.provider_name(),
            embeddings.len(),
            texts.len()
        )));
    }

    Ok(embeddings)
}
