//! Error types for the reindex coordinator.

use reindex_store::StoreError;
use thiserror::Error;

/// Errors that end a pass or a convergence run.
#[derive(Error, Debug)]
pub enum ReindexError {
    /// Queue store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Executor was interrupted or shut down
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Listing the resources of a type failed
    #[error("Listing error: {0}")]
    Listing(#[from] ListingError),

    /// Indexing a single resource failed
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Invalid runner configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Retrying did not reduce the error count
    #[error("Cannot recover from {errors} errors after {passes} passes")]
    Unrecoverable { errors: u64, passes: usize },
}

/// Errors surfaced by the bounded executor to the caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Execution interrupted")]
    Interrupted,

    #[error("Executor is shut down")]
    Closed,

    #[error("Executor capacity must be at least 1")]
    ZeroCapacity,
}

/// A fault raised while listing the resources of one type.
///
/// Any listing fault discards every item staged for that type.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ListingError {
    message: String,
}

impl ListingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ListingError {
    fn from(err: std::io::Error) -> Self {
        ListingError::new(err.to_string())
    }
}

/// A fault raised while indexing one resource.
///
/// The message is persisted as the failure payload of the item's result record.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
