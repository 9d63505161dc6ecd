//! Embedding configuration types.

use serde::{Deserialize, Serialize};

/// Embedding configuration for a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram", "ollama"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Provider-specific configuration (JSON object)
    #[serde(default)]
    pub provider_config: serde_json::Value,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            provider_config: serde_json::json!({}),
        }
    }
}

impl EmbeddingConfig {
    /// Build a config for a provider/model pair with that provider's default dimensions.
    pub fn for_model(provider: &str, model: &str) -> Self {
        let dimensions = match provider {
            "ollama" => 768,
            _ => 384,
        };

        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            dimensions,
            provider_config: serde_json::json!({}),
        }
    }

    /// Look up a string entry in `provider_config`.
    pub fn provider_option(&self, key: &str) -> Option<&str> {
        self.provider_config.get(key).and_then(|v| v.as_str())
    }
}
