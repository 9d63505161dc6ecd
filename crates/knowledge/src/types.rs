//! Knowledge system type definitions.

use crate::embeddings::EmbeddingConfig;
use serde::{Deserialize, Serialize};

/// Metadata attached to a stored document.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key naming the file a document came from.
pub const SOURCE_KEY: &str = "source";

/// Configuration for a knowledge base, stored as `<kb>/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Name of the knowledge base
    pub name: String,

    /// Embedding settings used to build the vector store
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Explicit vector store variant name; derived from the model when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_name: Option<String>,

    /// Vector store backend ("flat")
    #[serde(default = "default_vs_type")]
    pub vs_type: String,

    /// Default number of search hits
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Default minimum similarity for search hits
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    /// Chunk size in characters when splitting raw files
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_vs_type() -> String {
    "flat".to_string()
}

fn default_top_k() -> usize {
    3
}

fn default_score_threshold() -> f32 {
    0.2
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            embedding: EmbeddingConfig::default(),
            vector_name: None,
            vs_type: default_vs_type(),
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// A document as handed to and returned from the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier assigned by the store; `None` before insertion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Text content
    pub page_content: String,

    /// Metadata; `source` names the originating file
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document with a `source` metadata entry.
    pub fn new(page_content: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(
            SOURCE_KEY.to_string(),
            serde_json::Value::String(source.into()),
        );
        Self {
            id: None,
            page_content: page_content.into(),
            metadata,
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// The `source` metadata entry, if present and a string.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).and_then(|v| v.as_str())
    }
}

/// Identifier and metadata of a document inserted by `add_documents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocInfo {
    pub id: String,
    pub metadata: Metadata,
}

/// A search result with its cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
}

/// Where a file is known to a knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    /// Recorded in the document catalog (embedded into the index)
    InIndex,
    /// Present in `content/` but not embedded
    OnDiskOnly,
    /// Unknown
    Absent,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::InIndex => "in_index",
            DocStatus::OnDiskOnly => "on_disk_only",
            DocStatus::Absent => "absent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_source() {
        let doc = Document::new("hello world", "a.txt")
            .with_metadata("page", serde_json::json!(3));
        assert_eq!(doc.source(), Some("a.txt"));
        assert_eq!(doc.metadata["page"], 3);
        assert!(doc.id.is_none());
    }

    #[test]
    fn test_config_defaults_from_partial_yaml() {
        let config: KnowledgeBaseConfig =
            serde_yaml::from_str("name: samples\ntop_k: 7\n").unwrap();
        assert_eq!(config.name, "samples");
        assert_eq!(config.top_k, 7);
        assert_eq!(config.vs_type, "flat");
        assert_eq!(config.embedding.provider, "trigram");
        assert!(config.vector_name.is_none());
    }

    #[test]
    fn test_doc_status_serializes_snake_case() {
        let json = serde_json::to_string(&DocStatus::OnDiskOnly).unwrap();
        assert_eq!(json, "\"on_disk_only\"");
        assert_eq!(DocStatus::InIndex.as_str(), "in_index");
    }
}
