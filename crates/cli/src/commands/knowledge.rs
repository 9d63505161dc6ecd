//! Knowledge base command handlers.
//!
//! Each command opens the knowledge base through a shared
//! [`KnowledgeContext`] so that one process uses one index pool and one
//! document catalog.

use clap::Args;
use kbvault_core::{config::AppConfig, AppError, AppResult};
use kbvault_knowledge::config as kb_config;
use kbvault_knowledge::{
    DocStatus, DocumentCatalog, EmbeddingConfig, EmbeddingEngine, FlatBackend, IndexPool,
    KnowledgeBaseConfig, KnowledgeBaseService, SqliteCatalog,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Pool, catalog and embedding providers shared by every command.
pub struct KnowledgeContext {
    config: AppConfig,
    pool: Arc<IndexPool>,
    catalog: Arc<dyn DocumentCatalog>,
    engine: EmbeddingEngine,
}

impl KnowledgeContext {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let kb_root = config.knowledge_root();
        let catalog = SqliteCatalog::open(&kb_config::get_catalog_path(&kb_root))?;

        tracing::debug!("Knowledge root: {:?}", kb_root);

        Ok(Self {
            config: config.clone(),
            pool: Arc::new(IndexPool::new(kb_root, Arc::new(FlatBackend))),
            catalog: Arc::new(catalog),
            engine: EmbeddingEngine::new(),
        })
    }

    /// Service for `base` using its stored config, or defaults.
    pub fn open(&self, base: &str) -> AppResult<KnowledgeBaseService> {
        KnowledgeBaseService::open(
            Arc::clone(&self.pool),
            Arc::clone(&self.catalog),
            &self.engine,
            base,
        )
    }

    /// Like [`Self::open`] but fails when the base directory is missing.
    pub fn open_existing(&self, base: &str) -> AppResult<KnowledgeBaseService> {
        let service = self.open(base)?;
        if !service.exists() {
            return Err(AppError::NotFound(format!(
                "Knowledge base '{}' does not exist (run `kbvault create {}`)",
                base, base
            )));
        }
        Ok(service)
    }

    /// Config for a new base, seeded from the application's embedding defaults.
    fn new_base_config(&self, base: &str) -> AppResult<KnowledgeBaseConfig> {
        kb_config::validate_kb_name(base)?;

        let kb_root = self.pool.kb_root();
        if kb_config::get_config_path(kb_root, base).exists() {
            return kb_config::load_config(kb_root, base);
        }

        Ok(KnowledgeBaseConfig {
            name: base.to_string(),
            embedding: EmbeddingConfig::for_model(
                &self.config.embed_provider,
                &self.config.embed_model,
            ),
            ..Default::default()
        })
    }
}

fn print_json(value: &serde_json::Value) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Create a knowledge base (idempotent)
#[derive(Args, Debug)]
pub struct CreateCommand {
    /// Knowledge base name
    pub base: String,

    /// Vector store variant name (new bases only; defaults to the model name)
    #[arg(long)]
    pub vector_name: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl CreateCommand {
    pub async fn execute(&self, ctx: &KnowledgeContext) -> AppResult<()> {
        tracing::info!("Executing create command for base '{}'", self.base);

        let mut config = ctx.new_base_config(&self.base)?;
        if self.vector_name.is_some() {
            config.vector_name = self.vector_name.clone();
        }

        let embeddings = ctx.engine.provider_for(&config.embedding)?;
        let service = KnowledgeBaseService::new(
            Arc::clone(&ctx.pool),
            Arc::clone(&ctx.catalog),
            config,
            embeddings,
        )?;
        service.create().await?;

        if self.json {
            print_json(&serde_json::json!({
                "base": self.base,
                "variant": service.key().variant(),
                "path": service.kb_path(),
            }))?;
        } else {
            println!(
                "Knowledge base '{}' ready at {:?} (vector store: {})",
                self.base,
                service.kb_path(),
                service.key().variant()
            );
        }

        Ok(())
    }
}

/// Delete a knowledge base with its content and vector stores
#[derive(Args, Debug)]
pub struct DropCommand {
    /// Knowledge base name
    pub base: String,
}

impl DropCommand {
    pub async fn execute(&self, ctx: &KnowledgeContext) -> AppResult<()> {
        tracing::info!("Executing drop command for base '{}'", self.base);

        let service = ctx.open(&self.base)?;
        service.drop_kb().await?;

        println!("Knowledge base '{}' dropped", self.base);
        Ok(())
    }
}

/// Empty the vector store of a knowledge base, keeping its content files
#[derive(Args, Debug)]
pub struct ClearCommand {
    /// Knowledge base name
    pub base: String,
}

impl ClearCommand {
    pub async fn execute(&self, ctx: &KnowledgeContext) -> AppResult<()> {
        tracing::info!("Executing clear command for base '{}'", self.base);

        let service = ctx.open_existing(&self.base)?;
        service.clear().await?;

        println!("Knowledge base '{}' cleared", self.base);
        Ok(())
    }
}

/// Index files from the base's content directory
#[derive(Args, Debug)]
pub struct AddCommand {
    /// Knowledge base name
    pub base: String,

    /// File names relative to the content directory (or paths with --copy)
    pub files: Vec<String>,

    /// Index every file in the content directory
    #[arg(long, conflicts_with = "files")]
    pub all: bool,

    /// Copy the given paths into the content directory first
    #[arg(long)]
    pub copy: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AddCommand {
    pub async fn execute(&self, ctx: &KnowledgeContext) -> AppResult<()> {
        tracing::info!("Executing add command for base '{}'", self.base);

        let service = ctx.open_existing(&self.base)?;

        let file_names = if self.all {
            service.list_content_files()?
        } else if self.copy {
            self.copy_into_content(&service)?
        } else {
            self.files.clone()
        };

        if file_names.is_empty() {
            return Err(AppError::Config(
                "No files given (pass file names or --all)".to_string(),
            ));
        }

        let mut results = Vec::new();
        for file_name in &file_names {
            let infos = service.ingest_content_file(file_name).await?;
            results.push((file_name.clone(), infos.len()));
        }

        if self.json {
            let files: Vec<serde_json::Value> = results
                .iter()
                .map(|(file, docs)| serde_json::json!({ "file": file, "docs": docs }))
                .collect();
            print_json(&serde_json::json!({ "base": self.base, "files": files }))?;
        } else {
            for (file, docs) in &results {
                println!("Indexed {} ({} documents)", file, docs);
            }
        }

        Ok(())
    }

    fn copy_into_content(&self, service: &KnowledgeBaseService) -> AppResult<Vec<String>> {
        let content = service.content_path();
        std::fs::create_dir_all(&content)?;

        let mut names = Vec::new();
        for path in self.files.iter().map(PathBuf::from) {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| AppError::Config(format!("Not a file path: {:?}", path)))?;
            std::fs::copy(&path, content.join(&name)).map_err(|e| {
                AppError::Knowledge(format!("Failed to copy {:?} into {:?}: {}", path, content, e))
            })?;
            tracing::debug!("Copied {:?} to content/{}", path, name);
            names.push(name);
        }
        Ok(names)
    }
}

/// Remove files' documents from the vector store
#[derive(Args, Debug)]
pub struct DeleteCommand {
    /// Knowledge base name
    pub base: String,

    /// File names (matched case-insensitively)
    #[arg(required = true)]
    pub files: Vec<String>,

    /// Also delete the files from the content directory
    #[arg(long)]
    pub purge: bool,
}

impl DeleteCommand {
    pub async fn execute(&self, ctx: &KnowledgeContext) -> AppResult<()> {
        tracing::info!("Executing delete command for base '{}'", self.base);

        let service = ctx.open_existing(&self.base)?;
        for file_name in &self.files {
            let removed = service.delete_file(file_name, true).await?;

            if self.purge {
                let path = service.content_path().join(file_name);
                if path.is_file() {
                    std::fs::remove_file(&path)?;
                }
            }

            println!("Deleted {} ({} documents)", file_name, removed.len());
        }

        Ok(())
    }
}

/// Search a knowledge base
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Knowledge base name
    pub base: String,

    /// Query text
    pub query: String,

    /// Number of hits to return (defaults to the base's top_k)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Minimum similarity (defaults to the base's score_threshold)
    #[arg(short = 't', long)]
    pub threshold: Option<f32>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn execute(&self, ctx: &KnowledgeContext) -> AppResult<()> {
        tracing::info!("Executing search command for base '{}'", self.base);

        let service = ctx.open_existing(&self.base)?;
        let top_k = self.top_k.unwrap_or(service.config().top_k);
        let threshold = self.threshold.unwrap_or(service.config().score_threshold);

        let hits = service.search(&self.query, top_k, threshold).await?;

        if self.json {
            print_json(&serde_json::to_value(&hits)?)?;
            return Ok(());
        }

        if hits.is_empty() {
            println!("No results (threshold {:.2})", threshold);
            return Ok(());
        }

        for (i, hit) in hits.iter().enumerate() {
            println!(
                "{}. [{:.3}] {}",
                i + 1,
                hit.score,
                hit.document.source().unwrap_or("(unknown source)")
            );
            let preview: String = hit.document.page_content.chars().take(200).collect();
            println!("   {}", preview.replace('\n', " "));
        }

        Ok(())
    }
}

/// Report whether a file is indexed, only on disk, or unknown
#[derive(Args, Debug)]
pub struct ExistCommand {
    /// Knowledge base name
    pub base: String,

    /// File name
    pub file: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ExistCommand {
    pub async fn execute(&self, ctx: &KnowledgeContext) -> AppResult<()> {
        let service = ctx.open(&self.base)?;
        let status = service.exist_doc(&self.file)?;

        if self.json {
            print_json(&serde_json::json!({
                "base": self.base,
                "file": self.file,
                "status": status,
            }))?;
        } else {
            println!("{}", status.as_str());
        }

        Ok(())
    }
}

/// List indexed and on-disk files of a knowledge base
#[derive(Args, Debug)]
pub struct FilesCommand {
    /// Knowledge base name
    pub base: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl FilesCommand {
    pub async fn execute(&self, ctx: &KnowledgeContext) -> AppResult<()> {
        let service = ctx.open_existing(&self.base)?;
        let indexed = service.list_files()?;
        let content = service.list_content_files()?;

        if self.json {
            print_json(&serde_json::json!({
                "base": self.base,
                "indexed": indexed,
                "content": content,
            }))?;
            return Ok(());
        }

        println!("Knowledge base: {}", self.base);
        println!("  Documents: {}", service.count_docs().await?);
        for file in &content {
            let marker = match service.exist_doc(file)? {
                DocStatus::InIndex => "indexed",
                _ => "not indexed",
            };
            println!("  {} ({})", file, marker);
        }
        for record in indexed
            .iter()
            .filter(|r| !content.iter().any(|c| c.eq_ignore_ascii_case(&r.file_name)))
        {
            println!(
                "  {} (indexed, {} documents, missing from content)",
                record.file_name, record.docs_count
            );
        }

        Ok(())
    }
}
