//! Reindex command-line driver.
//!
//! Wires the coordinator in `reindex-core` to concrete collaborators:
//! [`ManifestLister`] reads resource identifiers from per-type manifest files
//! and [`WebhookIndexTask`] asks an indexing service to index each one.

pub mod cli;
pub mod commands;
pub mod manifest;
pub mod settings;
pub mod webhook;

pub use cli::{Cli, Commands, RunArgs};
pub use commands::{
    clear_errors, execute_run, new_store_path, run_reindex, show_results, show_status,
};
pub use manifest::ManifestLister;
pub use settings::Settings;
pub use webhook::WebhookIndexTask;
