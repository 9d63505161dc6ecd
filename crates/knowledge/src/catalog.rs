//! Document catalog: which files of a knowledge base have been embedded.
//!
//! The catalog lives apart from the vector store. It answers "is this file
//! known?" without loading an index, and records which document ids each
//! file produced.

use crate::types::DocInfo;
use chrono::{DateTime, Utc};
use kbvault_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A catalog row for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFileRecord {
    pub kb_name: String,
    pub file_name: String,
    pub docs_count: u32,
    pub file_version: u32,
    pub updated_at: DateTime<Utc>,
}

/// Catalog operations used by the knowledge base service.
pub trait DocumentCatalog: Send + Sync {
    /// Register a knowledge base (idempotent).
    fn register_kb(&self, kb_name: &str, vs_type: &str, embed_model: &str) -> AppResult<()>;

    /// Remove a knowledge base and every file recorded for it.
    fn forget_kb(&self, kb_name: &str) -> AppResult<()>;

    fn kb_exists(&self, kb_name: &str) -> AppResult<bool>;

    /// Record a file and the documents it produced, replacing earlier rows.
    fn record_file(&self, kb_name: &str, file_name: &str, docs: &[DocInfo]) -> AppResult<()>;

    /// Remove a file's rows. Unknown files are a no-op.
    fn forget_file(&self, kb_name: &str, file_name: &str) -> AppResult<()>;

    /// Remove every file row of a knowledge base, keeping the base itself.
    fn forget_files(&self, kb_name: &str) -> AppResult<()>;

    /// Case-insensitive lookup of a file name.
    fn file_exists(&self, kb_name: &str, file_name: &str) -> AppResult<bool>;

    fn list_files(&self, kb_name: &str) -> AppResult<Vec<KnowledgeFileRecord>>;

    fn doc_ids_for_file(&self, kb_name: &str, file_name: &str) -> AppResult<Vec<String>>;
}

/// SQLite-backed [`DocumentCatalog`].
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open (creating if needed) the catalog database.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Knowledge(format!("Failed to create catalog directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Knowledge(format!("Failed to open catalog: {}", e)))?;
        Self::init(conn, db_path)
    }

    /// Catalog held entirely in memory.
    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Knowledge(format!("Failed to open catalog: {}", e)))?;
        Self::init(conn, Path::new(":memory:"))
    }

    fn init(conn: Connection, db_path: &Path) -> AppResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_bases (
                kb_name TEXT PRIMARY KEY,
                vs_type TEXT NOT NULL,
                embed_model TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS knowledge_files (
                kb_name TEXT NOT NULL,
                file_name TEXT NOT NULL COLLATE NOCASE,
                docs_count INTEGER NOT NULL,
                file_version INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kb_name, file_name)
            );

            CREATE TABLE IF NOT EXISTS file_docs (
                kb_name TEXT NOT NULL,
                file_name TEXT NOT NULL COLLATE NOCASE,
                doc_id TEXT NOT NULL,
                metadata TEXT,
                PRIMARY KEY (kb_name, doc_id)
            );

            CREATE INDEX IF NOT EXISTS idx_file_docs_file ON file_docs(kb_name, file_name);
            "#,
        )
        .map_err(|e| AppError::Knowledge(format!("Failed to create catalog tables: {}", e)))?;

        tracing::debug!("Initialized document catalog at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| AppError::Knowledge(format!("{}: {}", context, e))
}

impl DocumentCatalog for SqliteCatalog {
    fn register_kb(&self, kb_name: &str, vs_type: &str, embed_model: &str) -> AppResult<()> {
        self.conn()
            .execute(
                "INSERT INTO knowledge_bases (kb_name, vs_type, embed_model, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(kb_name) DO UPDATE SET vs_type = ?2, embed_model = ?3",
                params![kb_name, vs_type, embed_model, Utc::now().to_rfc3339()],
            )
            .map_err(db_err("Failed to register knowledge base"))?;
        Ok(())
    }

    fn forget_kb(&self, kb_name: &str) -> AppResult<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to start transaction"))?;
        tx.execute("DELETE FROM file_docs WHERE kb_name = ?1", [kb_name])
            .map_err(db_err("Failed to delete file docs"))?;
        tx.execute("DELETE FROM knowledge_files WHERE kb_name = ?1", [kb_name])
            .map_err(db_err("Failed to delete files"))?;
        tx.execute("DELETE FROM knowledge_bases WHERE kb_name = ?1", [kb_name])
            .map_err(db_err("Failed to delete knowledge base"))?;
        tx.commit().map_err(db_err("Failed to commit"))?;
        Ok(())
    }

    fn kb_exists(&self, kb_name: &str) -> AppResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM knowledge_bases WHERE kb_name = ?1",
                [kb_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Failed to query knowledge base"))?;
        Ok(found.is_some())
    }

    fn record_file(&self, kb_name: &str, file_name: &str, docs: &[DocInfo]) -> AppResult<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to start transaction"))?;

        tx.execute(
            "INSERT INTO knowledge_files (kb_name, file_name, docs_count, file_version, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(kb_name, file_name) DO UPDATE SET
                 docs_count = ?3,
                 file_version = file_version + 1,
                 updated_at = ?4",
            params![kb_name, file_name, docs.len() as i64, Utc::now().to_rfc3339()],
        )
        .map_err(db_err("Failed to record file"))?;

        tx.execute(
            "DELETE FROM file_docs WHERE kb_name = ?1 AND file_name = ?2",
            params![kb_name, file_name],
        )
        .map_err(db_err("Failed to clear file docs"))?;

        for doc in docs {
            let metadata_json = serde_json::to_string(&doc.metadata)?;
            tx.execute(
                "INSERT OR REPLACE INTO file_docs (kb_name, file_name, doc_id, metadata)
                 VALUES (?1, ?2, ?3, ?4)",
                params![kb_name, file_name, doc.id, metadata_json],
            )
            .map_err(db_err("Failed to record file doc"))?;
        }

        tx.commit().map_err(db_err("Failed to commit"))?;
        Ok(())
    }

    fn forget_file(&self, kb_name: &str, file_name: &str) -> AppResult<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to start transaction"))?;
        tx.execute(
            "DELETE FROM file_docs WHERE kb_name = ?1 AND file_name = ?2",
            params![kb_name, file_name],
        )
        .map_err(db_err("Failed to delete file docs"))?;
        tx.execute(
            "DELETE FROM knowledge_files WHERE kb_name = ?1 AND file_name = ?2",
            params![kb_name, file_name],
        )
        .map_err(db_err("Failed to delete file"))?;
        tx.commit().map_err(db_err("Failed to commit"))?;
        Ok(())
    }

    fn forget_files(&self, kb_name: &str) -> AppResult<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to start transaction"))?;
        tx.execute("DELETE FROM file_docs WHERE kb_name = ?1", [kb_name])
            .map_err(db_err("Failed to delete file docs"))?;
        tx.execute("DELETE FROM knowledge_files WHERE kb_name = ?1", [kb_name])
            .map_err(db_err("Failed to delete files"))?;
        tx.commit().map_err(db_err("Failed to commit"))?;
        Ok(())
    }

    fn file_exists(&self, kb_name: &str, file_name: &str) -> AppResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM knowledge_files WHERE kb_name = ?1 AND file_name = ?2",
                params![kb_name, file_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Failed to query file"))?;
        Ok(found.is_some())
    }

    fn list_files(&self, kb_name: &str) -> AppResult<Vec<KnowledgeFileRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT kb_name, file_name, docs_count, file_version, updated_at
                 FROM knowledge_files WHERE kb_name = ?1 ORDER BY file_name",
            )
            .map_err(db_err("Failed to prepare query"))?;

        let rows = stmt
            .query_map([kb_name], |row| {
                let updated_at: String = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    updated_at,
                ))
            })
            .map_err(db_err("Failed to list files"))?;

        let mut records = Vec::new();
        for row in rows {
            let (kb_name, file_name, docs_count, file_version, updated_at) =
                row.map_err(db_err("Failed to read file row"))?;
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| AppError::Knowledge(format!("Bad timestamp in catalog: {}", e)))?
                .with_timezone(&Utc);
            records.push(KnowledgeFileRecord {
                kb_name,
                file_name,
                docs_count: docs_count as u32,
                file_version: file_version as u32,
                updated_at,
            });
        }

        Ok(records)
    }

    fn doc_ids_for_file(&self, kb_name: &str, file_name: &str) -> AppResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT doc_id FROM file_docs WHERE kb_name = ?1 AND file_name = ?2")
            .map_err(db_err("Failed to prepare query"))?;
        let ids = stmt
            .query_map(params![kb_name, file_name], |row| row.get::<_, String>(0))
            .map_err(db_err("Failed to query doc ids"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("Failed to read doc id"))?;
        Ok(ids)
    }
}
