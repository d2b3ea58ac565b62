//! Reindex
//!
//! Rebuilds a search index from a resource repository, one resource type at a
//! time, and can be resumed after any interruption.
//!
//! # Usage
//!
//! ```bash
//! reindex run [STORE] [--type NAME]... [--manifest-dir DIR] [--indexer-url URL]
//! reindex status STORE
//! reindex clear-errors STORE
//! reindex results STORE [--failed] [--limit N]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/reindex/config.toml)
//! 3. Config file given with --config
//! 4. Environment variables (REINDEX_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use reindex_cli::{clear_errors, run_reindex, show_results, show_status, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            run_reindex(cli.config.as_deref(), cli.log_level.as_deref(), args).await?;
        }
        Commands::Status { store } => {
            show_status(&store)?;
        }
        Commands::ClearErrors { store } => {
            clear_errors(&store)?;
        }
        Commands::Results {
            store,
            failed,
            limit,
        } => {
            show_results(&store, failed, limit)?;
        }
    }

    Ok(())
}
