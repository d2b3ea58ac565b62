//! Row types persisted in the queue store.
//!
//! All rows are stored as JSON so a store can be inspected with generic
//! RocksDB tooling when something needs forensic attention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Progress of a type or item through the queue.
///
/// Items never reach `Done`: a processed item is deleted and leaves a
/// success [`ResultRecord`] behind instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Enqueued,
    Running,
    Failed,
    Done,
}

impl Progress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Progress::Enqueued => "enqueued",
            Progress::Running => "running",
            Progress::Failed => "failed",
            Progress::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enqueued" => Some(Progress::Enqueued),
            "running" => Some(Progress::Running),
            "failed" => Some(Progress::Failed),
            "done" => Some(Progress::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing progress for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTask {
    /// Position in the seeded type registry; also the row key
    pub sequence: u64,
    /// Stable type identifier handed to the lister
    pub name: String,
    pub progress: Progress,
}

impl TypeTask {
    pub fn new(sequence: u64, name: impl Into<String>) -> Self {
        Self {
            sequence,
            name: name.into(),
            progress: Progress::Enqueued,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(StoreError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(StoreError::from)
    }
}

/// Processing progress for one resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTask {
    pub id: u64,
    /// Name of the owning [`TypeTask`]
    pub type_name: String,
    /// Resource identifier handed to the index task
    pub uri: String,
    pub progress: Progress,
}

impl ItemTask {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(StoreError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(StoreError::from)
    }
}

/// Outcome of one item attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
        }
    }
}

/// Append-only audit entry for an item attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub type_name: String,
    pub uri: String,
    pub outcome: Outcome,
    /// Task return value on success, failure description otherwise
    pub payload: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub recorded_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn success(item: &ItemTask, payload: impl Into<String>) -> Self {
        Self {
            type_name: item.type_name.clone(),
            uri: item.uri.clone(),
            outcome: Outcome::Success,
            payload: payload.into(),
            recorded_at: Utc::now(),
        }
    }

    pub fn failure(item: &ItemTask, description: impl Into<String>) -> Self {
        Self {
            type_name: item.type_name.clone(),
            uri: item.uri.clone(),
            outcome: Outcome::Failure,
            payload: description.into(),
            recorded_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(StoreError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(StoreError::from)
    }
}

/// Written once when a fresh store is initialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Number of types seeded at initialization
    pub type_count: u64,
    pub format_version: u32,
}

impl StoreMeta {
    pub const FORMAT_VERSION: u32 = 1;

    pub fn new(type_count: u64) -> Self {
        Self {
            created_at: Utc::now(),
            type_count,
            format_version: Self::FORMAT_VERSION,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(StoreError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(StoreError::from)
    }
}
