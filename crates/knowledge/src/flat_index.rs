//! Brute-force vector store persisted as a JSON snapshot.
//!
//! Every search scores all stored vectors with cosine similarity. The
//! snapshot is a single `index.json` written through a temp file and a
//! rename, so readers of the directory never observe a half-written file.

use crate::types::{Document, Metadata, SearchHit, SOURCE_KEY};
use crate::vector_index::{cosine_similarity, VectorStore, VectorStoreBackend};
use kbvault_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const SNAPSHOT_FILE: &str = "index.json";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    id: String,
    text: String,
    embedding: Vec<f32>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    dimensions: usize,
    entries: Vec<Entry>,
}

/// In-memory flat index.
#[derive(Debug, Default)]
pub struct FlatIndex {
    dimensions: usize,
    entries: Vec<Entry>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: Vec::new(),
        }
    }

    /// Read a snapshot directory.
    pub fn load(dir: &Path) -> AppResult<Self> {
        let path = dir.join(SNAPSHOT_FILE);
        let bytes = fs::read(&path).map_err(|e| {
            AppError::Knowledge(format!("Failed to read snapshot {:?}: {}", path, e))
        })?;

        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Knowledge(format!("Corrupt snapshot {:?}: {}", path, e))
        })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::Knowledge(format!(
                "Unsupported snapshot version {} in {:?}",
                snapshot.version, path
            )));
        }

        let mut seen = HashSet::with_capacity(snapshot.entries.len());
        for entry in &snapshot.entries {
            if entry.embedding.len() != snapshot.dimensions {
                return Err(AppError::Knowledge(format!(
                    "Snapshot {:?}: entry '{}' has dimension {}, expected {}",
                    path,
                    entry.id,
                    entry.embedding.len(),
                    snapshot.dimensions
                )));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(AppError::Knowledge(format!(
                    "Snapshot {:?}: duplicate id '{}'",
                    path, entry.id
                )));
            }
        }

        tracing::debug!(
            "Loaded flat index from {:?}: {} entries, dimension {}",
            dir,
            snapshot.entries.len(),
            snapshot.dimensions
        );

        Ok(Self {
            dimensions: snapshot.dimensions,
            entries: snapshot.entries,
        })
    }

    fn to_document(entry: &Entry) -> Document {
        Document {
            id: Some(entry.id.clone()),
            page_content: entry.text.clone(),
            metadata: entry.metadata.clone(),
        }
    }
}

impl VectorStore for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn add(
        &mut self,
        texts: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> AppResult<Vec<String>> {
        if texts.len() != embeddings.len() || texts.len() != metadatas.len() {
            return Err(AppError::Knowledge(format!(
                "Mismatched batch: {} texts, {} embeddings, {} metadatas",
                texts.len(),
                embeddings.len(),
                metadatas.len()
            )));
        }

        // Validate the whole batch before touching the entries
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimensions) {
            return Err(AppError::Knowledge(format!(
                "Embedding dimension {} does not match index dimension {}",
                bad.len(),
                self.dimensions
            )));
        }

        let mut ids = Vec::with_capacity(texts.len());
        for ((text, embedding), metadata) in texts.iter().zip(embeddings).zip(metadatas) {
            let id = uuid::Uuid::new_v4().to_string();
            self.entries.push(Entry {
                id: id.clone(),
                text: text.clone(),
                embedding: embedding.clone(),
                metadata: metadata.clone(),
            });
            ids.push(id);
        }

        Ok(ids)
    }

    fn delete(&mut self, ids: &[String]) -> AppResult<usize> {
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let before = self.entries.len();
        self.entries.retain(|e| !targets.contains(e.id.as_str()));
        Ok(before - self.entries.len())
    }

    fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> AppResult<Vec<SearchHit>> {
        if query_embedding.len() != self.dimensions {
            return Err(AppError::Knowledge(format!(
                "Query dimension {} does not match index dimension {}",
                query_embedding.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(&Entry, f32)> = self
            .entries
            .iter()
            .map(|e| (e, cosine_similarity(query_embedding, &e.embedding)))
            .filter(|(_, score)| *score >= score_threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(entry, score)| SearchHit {
                document: Self::to_document(entry),
                score,
            })
            .collect())
    }

    fn get(&self, ids: &[String]) -> Vec<Document> {
        ids.iter()
            .filter_map(|id| self.entries.iter().find(|e| &e.id == id))
            .map(Self::to_document)
            .collect()
    }

    fn ids_where_source(&self, matches: &dyn Fn(&str) -> bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| {
                e.metadata
                    .get(SOURCE_KEY)
                    .and_then(|v| v.as_str())
                    .is_some_and(matches)
            })
            .map(|e| e.id.clone())
            .collect()
    }

    fn save(&self, dir: &Path) -> AppResult<()> {
        fs::create_dir_all(dir)?;

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            dimensions: self.dimensions,
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;

        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;

        tracing::debug!("Saved flat index to {:?} ({} entries)", dir, self.entries.len());
        Ok(())
    }
}

/// Backend producing [`FlatIndex`] stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatBackend;

impl VectorStoreBackend for FlatBackend {
    fn name(&self) -> &str {
        "flat"
    }

    fn exists(&self, dir: &Path) -> bool {
        dir.join(SNAPSHOT_FILE).is_file()
    }

    fn load(&self, dir: &Path) -> AppResult<Box<dyn VectorStore>> {
        Ok(Box::new(FlatIndex::load(dir)?))
    }

    fn create(&self, dimensions: usize) -> Box<dyn VectorStore> {
        Box::new(FlatIndex::new(dimensions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(source: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert(SOURCE_KEY.to_string(), serde_json::json!(source));
        m
    }

    fn seeded() -> (FlatIndex, Vec<String>) {
        let mut index = FlatIndex::new(3);
        let ids = index
            .add(
                &["rust".to_string(), "python".to_string(), "go".to_string()],
                &[
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.7, 0.7, 0.0],
                ],
                &[meta("a.md"), meta("b.md"), meta("A.MD")],
            )
            .unwrap();
        (index, ids)
    }

    #[test]
    fn test_search_ranks_and_thresholds() {
        let (index, ids) = seeded();

        let hits = index.search(&[1.0, 0.0, 0.0], 10, 0.5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id.as_deref(), Some(ids[0].as_str()));
        assert!(hits[0].score > hits[1].score);

        let hits = index.search(&[1.0, 0.0, 0.0], 1, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_add_rejects_wrong_dimension_without_partial_insert() {
        let mut index = FlatIndex::new(3);
        let result = index.add(
            &["ok".to_string(), "bad".to_string()],
            &[vec![1.0, 0.0, 0.0], vec![1.0]],
            &[meta("a"), meta("b")],
        );
        assert!(result.is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_delete_ignores_unknown_ids() {
        let (mut index, ids) = seeded();
        let removed = index
            .delete(&[ids[1].clone(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.delete(&[ids[1].clone()]).unwrap(), 0);
    }

    #[test]
    fn test_ids_where_source() {
        let (index, ids) = seeded();
        let found = index.ids_where_source(&|s| s.eq_ignore_ascii_case("a.md"));
        assert_eq!(found, vec![ids[0].clone(), ids[2].clone()]);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let (index, ids) = seeded();
        index.save(temp.path()).unwrap();

        let backend = FlatBackend;
        assert!(backend.exists(temp.path()));
        let loaded = backend.load(temp.path()).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.dimensions(), 3);

        let docs = loaded.get(&[ids[1].clone()]);
        assert_eq!(docs[0].page_content, "python");
        assert!(!temp.path().join("index.json.tmp").exists());
    }

    #[test]
    fn test_load_corrupt_snapshot() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(SNAPSHOT_FILE), b"{\"version\": 1, \"dimen").unwrap();

        let result = FlatBackend.load(temp.path());
        assert!(matches!(result, Err(AppError::Knowledge(_))));
    }

    #[test]
    fn test_load_rejects_inconsistent_dimensions() {
        let temp = TempDir::new().unwrap();
        let snapshot = serde_json::json!({
            "version": 1,
            "dimensions": 3,
            "entries": [{ "id": "x", "text": "t", "embedding": [1.0, 0.0] }]
        });
        fs::write(temp.path().join(SNAPSHOT_FILE), snapshot.to_string()).unwrap();

        assert!(FlatBackend.load(temp.path()).is_err());
    }
}
