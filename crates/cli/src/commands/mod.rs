//! Command handlers for the kbvault CLI.

pub mod knowledge;

pub use knowledge::{
    AddCommand, ClearCommand, CreateCommand, DeleteCommand, DropCommand, ExistCommand,
    FilesCommand, KnowledgeContext, SearchCommand,
};
