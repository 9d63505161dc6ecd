//! kbvault CLI
//!
//! Main entry point for the kbvault command-line tool.
//! Manages local knowledge bases backed by pooled vector stores.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{
    AddCommand, ClearCommand, CreateCommand, DeleteCommand, DropCommand, ExistCommand,
    FilesCommand, KnowledgeContext, SearchCommand,
};
use kbvault_core::config::AppConfig;
use kbvault_core::logging::{self, LogFormat};
use std::path::PathBuf;

/// kbvault - local knowledge bases with vector search
#[derive(Parser, Debug)]
#[command(name = "kbvault")]
#[command(about = "Local knowledge bases with vector search", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "KBVAULT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "KBVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the knowledge bases
    #[arg(long, global = true, env = "KBVAULT_KB_ROOT")]
    kb_root: Option<PathBuf>,

    /// Embedding model for new knowledge bases
    #[arg(short, long, global = true, env = "KBVAULT_EMBED_MODEL")]
    model: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a knowledge base
    Create(CreateCommand),

    /// Delete a knowledge base
    Drop(DropCommand),

    /// Empty a knowledge base's vector store
    Clear(ClearCommand),

    /// Index files from the content directory
    Add(AddCommand),

    /// Remove files from the vector store
    Delete(DeleteCommand),

    /// Search a knowledge base
    Search(SearchCommand),

    /// Check whether a file is known to a knowledge base
    Exist(ExistCommand),

    /// List files of a knowledge base
    Files(FilesCommand),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Create(_) => "create",
            Commands::Drop(_) => "drop",
            Commands::Clear(_) => "clear",
            Commands::Add(_) => "add",
            Commands::Delete(_) => "delete",
            Commands::Search(_) => "search",
            Commands::Exist(_) => "exist",
            Commands::Files(_) => "files",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Apply CLI overrides
    let mut config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.kb_root,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );
    if cli.log_json {
        config.log_json = true;
    }

    let format = if config.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    logging::init_logging(config.log_level.as_deref(), config.no_color, format)?;

    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!(
        "Embedding defaults: {} / {}",
        config.embed_provider,
        config.embed_model
    );

    config.ensure_state_dir()?;

    let ctx = KnowledgeContext::new(&config).context("Failed to open knowledge root")?;

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    // Route to command handlers
    let result = match &cli.command {
        Commands::Create(cmd) => cmd.execute(&ctx).await,
        Commands::Drop(cmd) => cmd.execute(&ctx).await,
        Commands::Clear(cmd) => cmd.execute(&ctx).await,
        Commands::Add(cmd) => cmd.execute(&ctx).await,
        Commands::Delete(cmd) => cmd.execute(&ctx).await,
        Commands::Search(cmd) => cmd.execute(&ctx).await,
        Commands::Exist(cmd) => cmd.execute(&ctx).await,
        Commands::Files(cmd) => cmd.execute(&ctx).await,
    };

    match &result {
        Ok(_) => tracing::debug!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result.with_context(|| format!("{} failed", cli.command.name()))
}
