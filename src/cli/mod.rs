//! Command-line interface.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::OutputFormat;

/// Bulk-load dense and sparse embeddings into a vector store and query them.
#[derive(Debug, Parser)]
#[command(name = "hybridload")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(long, short = 'f', global = true, help = "Output format: text or json")]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, short = 'c', global = true, help = "Path to a config file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stream a JSONL file into the collection, then build the index
    Ingest(commands::IngestArgs),

    /// Enable the HNSW index and wait until it is ready
    BuildIndex(commands::BuildIndexArgs),

    /// Dense, sparse or hybrid search
    Search(commands::SearchArgs),

    /// Check vector store, embedding server and collection status
    Status,

    /// Manage the collection (create, delete, payload indexes)
    #[command(subcommand)]
    Collection(commands::CollectionCommand),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
