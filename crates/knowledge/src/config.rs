//! Knowledge base configuration and on-disk layout.
//!
//! ```text
//! <kb_root>/
//!   catalog.sqlite
//!   <kb_name>/
//!     config.yaml
//!     content/                 raw uploaded files
//!     vector_store/<variant>/  persisted index snapshot
//! ```

use crate::types::KnowledgeBaseConfig;
use kbvault_core::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Load knowledge base configuration.
///
/// Loads from `<kb_root>/<base>/config.yaml` if it exists, otherwise returns
/// a default config with the provided base name.
pub fn load_config(kb_root: &Path, base_name: &str) -> AppResult<KnowledgeBaseConfig> {
    let config_path = get_config_path(kb_root, base_name);

    if !config_path.exists() {
        tracing::debug!(
            "Using default knowledge base config for '{}' (no config file found)",
            base_name
        );
        return Ok(KnowledgeBaseConfig {
            name: base_name.to_string(),
            ..Default::default()
        });
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
    })?;

    let mut config: KnowledgeBaseConfig = serde_yaml::from_str(&content).map_err(|e| {
        AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
    })?;

    // The directory name is authoritative
    config.name = base_name.to_string();

    tracing::debug!("Loaded knowledge base config for '{}'", base_name);
    Ok(config)
}

/// Save knowledge base configuration.
pub fn save_config(kb_root: &Path, config: &KnowledgeBaseConfig) -> AppResult<()> {
    let config_path = get_config_path(kb_root, &config.name);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Config(format!("Failed to create config directory: {}", e)))?;
    }

    let yaml = serde_yaml::to_string(config)?;

    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved knowledge base config for '{}'", config.name);
    Ok(())
}

/// Get the directory for a knowledge base.
pub fn get_kb_path(kb_root: &Path, base_name: &str) -> PathBuf {
    kb_root.join(base_name)
}

/// Get the raw content directory for a knowledge base.
pub fn get_content_path(kb_root: &Path, base_name: &str) -> PathBuf {
    get_kb_path(kb_root, base_name).join("content")
}

/// Get the snapshot directory for one vector store variant.
pub fn get_vs_path(kb_root: &Path, base_name: &str, variant: &str) -> PathBuf {
    get_kb_path(kb_root, base_name)
        .join("vector_store")
        .join(variant)
}

/// Get the path to a base's config file.
pub fn get_config_path(kb_root: &Path, base_name: &str) -> PathBuf {
    get_kb_path(kb_root, base_name).join("config.yaml")
}

/// Get the document catalog database path.
pub fn get_catalog_path(kb_root: &Path) -> PathBuf {
    kb_root.join("catalog.sqlite")
}

/// Reject names that would escape the knowledge root.
pub fn validate_kb_name(base_name: &str) -> AppResult<()> {
    let invalid = base_name.is_empty()
        || base_name == "."
        || base_name == ".."
        || base_name.contains(['/', '\\']);
    if invalid {
        return Err(AppError::Config(format!(
            "Invalid knowledge base name: '{}'",
            base_name
        )));
    }
    Ok(())
}
