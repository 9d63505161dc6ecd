//! Configuration management for kbvault.
//!
//! Configuration is merged from several sources, later ones winning:
//! - Built-in defaults
//! - Config file (`.kbvault/config.yaml` or `KBVAULT_CONFIG`)
//! - Environment variables
//! - Command-line flags
//!
//! The configuration is workspace-centric, with all state stored in `.kbvault/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Name of the state directory inside a workspace.
pub const STATE_DIR: &str = ".kbvault";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .kbvault/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Root directory holding one folder per knowledge base.
    ///
    /// Defaults to `<workspace>/.kbvault/knowledge` when unset.
    pub kb_root: Option<PathBuf>,

    /// Default embedding provider for new knowledge bases ("trigram", "ollama")
    pub embed_provider: String,

    /// Default embedding model identifier
    pub embed_model: String,

    /// Log level override
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    pub log_json: bool,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
    embedding: Option<EmbeddingDefaults>,
    knowledge: Option<KnowledgeRootConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingDefaults {
    provider: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnowledgeRootConfig {
    root: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            kb_root: None,
            embed_provider: "trigram".to_string(), // Offline default
            embed_model: "trigram-v1".to_string(),
            log_level: None,
            log_json: false,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, the config file and defaults.
    ///
    /// Environment variables:
    /// - `KBVAULT_WORKSPACE`: Override workspace path
    /// - `KBVAULT_CONFIG`: Path to config file
    /// - `KBVAULT_KB_ROOT`: Knowledge base root directory
    /// - `KBVAULT_EMBED_PROVIDER`: Embedding provider
    /// - `KBVAULT_EMBED_MODEL`: Embedding model identifier
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("KBVAULT_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("KBVAULT_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = match config.config_file {
            Some(ref cf) => cf.clone(),
            None => config.state_dir().join("config.yaml"),
        };

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(root) = std::env::var("KBVAULT_KB_ROOT") {
            config.kb_root = Some(PathBuf::from(root));
        }

        if let Ok(provider) = std::env::var("KBVAULT_EMBED_PROVIDER") {
            config.embed_provider = provider;
        }

        if let Ok(model) = std::env::var("KBVAULT_EMBED_MODEL") {
            config.embed_model = model;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        Ok(self.merge_file(config_file))
    }

    fn merge_file(&self, config_file: ConfigFile) -> Self {
        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(json) = logging.json {
                result.log_json = json;
            }
        }

        if let Some(embedding) = config_file.embedding {
            if let Some(provider) = embedding.provider {
                result.embed_provider = provider;
            }
            if let Some(model) = embedding.model {
                result.embed_model = model;
            }
        }

        if let Some(root) = config_file.knowledge.and_then(|k| k.root) {
            result.kb_root = Some(PathBuf::from(root));
        }

        result
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        kb_root: Option<PathBuf>,
        embed_model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(kb_root) = kb_root {
            self.kb_root = Some(kb_root);
        }

        if let Some(model) = embed_model {
            self.embed_model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .kbvault directory.
    pub fn state_dir(&self) -> PathBuf {
        self.workspace.join(STATE_DIR)
    }

    /// Directory that holds one sub-directory per knowledge base.
    pub fn knowledge_root(&self) -> PathBuf {
        match self.kb_root {
            Some(ref root) => root.clone(),
            None => self.state_dir().join("knowledge"),
        }
    }

    /// Ensure the .kbvault directory and the knowledge root exist.
    pub fn ensure_state_dir(&self) -> AppResult<()> {
        let root = self.knowledge_root();
        std::fs::create_dir_all(&root).map_err(|e| {
            AppError::Config(format!(
                "Failed to create knowledge root {:?}: {}",
                root, e
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.embed_provider, "trigram");
        assert_eq!(config.embed_model, "trigram-v1");
        assert!(!config.verbose);
        assert!(!config.no_color);
        assert!(config.knowledge_root().ends_with(".kbvault/knowledge"));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default();
        let overridden = config.with_overrides(
            None,
            None,
            Some(PathBuf::from("/srv/kb")),
            Some("nomic-embed-text".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(overridden.embed_model, "nomic-embed-text");
        assert_eq!(overridden.knowledge_root(), PathBuf::from("/srv/kb"));
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_merge_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "logging:\n  level: trace\n  color: false\nembedding:\n  provider: ollama\n  model: nomic-embed-text\nknowledge:\n  root: /data/kb\n",
        )
        .unwrap();

        let merged = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(merged.log_level.as_deref(), Some("trace"));
        assert!(merged.no_color);
        assert_eq!(merged.embed_provider, "ollama");
        assert_eq!(merged.embed_model, "nomic-embed-text");
        assert_eq!(merged.knowledge_root(), PathBuf::from("/data/kb"));
    }

    #[test]
    fn test_merge_yaml_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "logging: [unclosed").unwrap();

        let result = AppConfig::default().merge_yaml(&path);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_ensure_state_dir() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig {
            workspace: temp.path().to_path_buf(),
            ..Default::default()
        };
        config.ensure_state_dir().unwrap();
        assert!(temp.path().join(".kbvault/knowledge").is_dir());
    }
}
