//! Pool keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one vector store: a knowledge base plus a variant name.
///
/// A knowledge base may carry several stores side by side, typically one
/// per embedding model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexKey {
    kb_name: String,
    variant: String,
}

impl IndexKey {
    pub fn new(kb_name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            kb_name: kb_name.into(),
            variant: variant.into(),
        }
    }

    /// Key whose variant is derived from an embedding model identifier.
    pub fn for_model(kb_name: impl Into<String>, embed_model: &str) -> Self {
        Self::new(kb_name, variant_name(embed_model))
    }

    pub fn kb_name(&self) -> &str {
        &self.kb_name
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kb_name, self.variant)
    }
}

/// Normalize an embedding model identifier into a directory-safe variant name.
///
/// Every character that is not alphanumeric becomes `_`.
pub fn variant_name(embed_model: &str) -> String {
    embed_model
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_name() {
        assert_eq!(variant_name("nomic-embed-text:latest"), "nomic_embed_text_latest");
        assert_eq!(variant_name("bge-large-zh-v1.5"), "bge_large_zh_v1_5");
        assert_eq!(variant_name("trigram"), "trigram");
    }

    #[test]
    fn test_key_for_model() {
        let key = IndexKey::for_model("samples", "text-embedding-3-small");
        assert_eq!(key.kb_name(), "samples");
        assert_eq!(key.variant(), "text_embedding_3_small");
        assert_eq!(key.to_string(), "samples/text_embedding_3_small");
        assert_eq!(key, IndexKey::new("samples", "text_embedding_3_small"));
    }
}
