//! Key encoding and decoding for the queue store.
//!
//! Key formats:
//! - types: `type:{sequence:010}`
//! - items: `item:{sequence:020}`
//! - item_progress: `{progress}:{item_id:020}`
//! - results: `result:{sequence:020}`
//!
//! Zero-padded sequences keep RocksDB's lexicographic order equal to
//! insertion order, so forward scans see rows in the order they were written.

use crate::error::StoreError;
use crate::records::Progress;

/// Key for the store metadata row
pub const META_KEY: &[u8] = b"meta:store";

fn parse_prefixed(bytes: &[u8], prefix: &str) -> Result<u64, StoreError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| StoreError::Key(format!("Invalid UTF-8: {}", e)))?;

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 || parts[0] != prefix {
        return Err(StoreError::Key(format!("Invalid {} key format: {}", prefix, s)));
    }

    parts[1]
        .parse()
        .map_err(|e| StoreError::Key(format!("Invalid sequence: {}", e)))
}

/// Key for type queue rows
/// Format: type:{sequence:010}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeKey {
    /// Seeding order of the type
    pub sequence: u64,
}

impl TypeKey {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("type:{:010}", self.sequence).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        parse_prefixed(bytes, "type").map(Self::new)
    }
}

/// Key for item queue rows
/// Format: item:{sequence:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemKey {
    /// Monotonic item id
    pub sequence: u64,
}

impl ItemKey {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("item:{:020}", self.sequence).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        parse_prefixed(bytes, "item").map(Self::new)
    }
}

/// Key for the item progress index
/// Format: {progress}:{item_id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressKey {
    pub progress: Progress,
    pub item_id: u64,
}

impl ProgressKey {
    pub fn new(progress: Progress, item_id: u64) -> Self {
        Self { progress, item_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{:020}", self.progress.as_str(), self.item_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StoreError::Key(format!("Invalid UTF-8: {}", e)))?;

        let (progress, id) = s
            .split_once(':')
            .ok_or_else(|| StoreError::Key(format!("Invalid progress key format: {}", s)))?;
        let progress = Progress::parse(progress)
            .ok_or_else(|| StoreError::Key(format!("Unknown progress: {}", progress)))?;
        let item_id = id
            .parse()
            .map_err(|e| StoreError::Key(format!("Invalid item id: {}", e)))?;

        Ok(Self { progress, item_id })
    }

    /// Prefix selecting every item at the given progress
    pub fn prefix(progress: Progress) -> Vec<u8> {
        format!("{}:", progress.as_str()).into_bytes()
    }
}

/// Key for result log entries
/// Format: result:{sequence:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultKey {
    /// Monotonic append sequence
    pub sequence: u64,
}

impl ResultKey {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("result:{:020}", self.sequence).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        parse_prefixed(bytes, "result").map(Self::new)
    }
}
