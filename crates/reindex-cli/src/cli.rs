//! CLI argument parsing for the reindex tool.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Resumable reindexer
///
/// Lists every resource of every configured type and indexes each one,
/// keeping progress in an on-disk store so an interrupted run can resume.
#[derive(Parser, Debug)]
#[command(name = "reindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/reindex/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Reindex commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run until every type and item is done, resuming STORE if given
    Run(RunArgs),

    /// Show queue statistics for a store
    Status {
        /// Store to inspect
        store: PathBuf,
    },

    /// Reset failed types and items so the next run retries them
    ClearErrors {
        /// Store to update
        store: PathBuf,
    },

    /// Print recorded results
    Results {
        /// Store to inspect
        store: PathBuf,

        /// Only show failures
        #[arg(long)]
        failed: bool,

        /// Maximum number of records to print
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Existing store to resume; a new one is created when omitted
    pub store: Option<PathBuf>,

    /// Resource type to reindex (repeatable, overrides configured types)
    #[arg(long = "type", value_name = "NAME")]
    pub types: Vec<String>,

    /// Directory holding <type>.txt manifests
    #[arg(long)]
    pub manifest_dir: Option<String>,

    /// Endpoint that indexes a single resource
    #[arg(long)]
    pub indexer_url: Option<String>,

    /// Directory where new stores are created
    #[arg(long)]
    pub store_dir: Option<String>,

    /// Maximum concurrent units of work
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Items polled per dispatch round
    #[arg(long)]
    pub batch_size: Option<usize>,
}
