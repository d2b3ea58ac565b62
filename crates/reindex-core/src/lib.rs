//! Reindex coordinator.
//!
//! Rebuilds a search index by walking every resource type, listing its
//! resources, and running an index task for each one. Progress lives in a
//! [`reindex_store::Store`], so an interrupted run resumes where it stopped.
//!
//! ## Key Components
//!
//! - [`Lister`] / [`IndexTask`]: The collaborators that list resources for a
//!   type and index a single resource
//! - [`BoundedExecutor`]: Fixed worker pool with slot-based admission control
//! - [`Runner`]: One full pass, listing and dispatching concurrently
//! - [`Runner::run_to_convergence`]: Repeats passes after clearing failures
//!   until no errors remain or the error count stops falling
//!
//! ## Example
//!
//! ```ignore
//! use reindex_core::{Runner, RunnerConfig};
//! use reindex_store::Store;
//!
//! let store = Arc::new(Store::initialize(&path, &["Grant", "Submission"])?);
//! let runner = Runner::new(store, RunnerConfig::default(), CancellationToken::new())?;
//! let report = runner.run_to_convergence(lister, task).await?;
//! ```

pub mod collaborator;
pub mod config;
pub mod convergence;
mod dispatch;
pub mod error;
pub mod executor;
mod listing;
pub mod progress;
pub mod runner;
mod staging;

pub use collaborator::{resource_stream, IndexTask, Lister, ResourceStream};
pub use config::RunnerConfig;
pub use convergence::ConvergenceReport;
pub use error::{ExecutorError, ListingError, ReindexError, TaskError};
pub use executor::{BoundedExecutor, ExecutorStats};
pub use progress::{LoggingProgressCallback, NoOpProgressCallback, PassProgress, ProgressCallback};
pub use runner::{PassReport, Runner};
