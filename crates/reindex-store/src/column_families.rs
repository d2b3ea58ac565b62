//! Column family definitions for RocksDB.
//!
//! Each column family plays the role of one table:
//! - types: One row per resource type to list (default compaction)
//! - items: One row per resource identifier awaiting processing
//! - item_progress: `{progress}:{item_id}` index over items
//! - results: Append-only outcome log (compressed)
//! - meta: Store creation metadata

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for the type queue
pub const CF_TYPES: &str = "types";

/// Column family name for the item queue
pub const CF_ITEMS: &str = "items";

/// Column family name for the item progress index
pub const CF_ITEM_PROGRESS: &str = "item_progress";

/// Column family name for the result log
pub const CF_RESULTS: &str = "results";

/// Column family name for store metadata
pub const CF_META: &str = "meta";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_TYPES, CF_ITEMS, CF_ITEM_PROGRESS, CF_RESULTS, CF_META];

/// Result log is append-only and mostly cold; compress it
fn results_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_TYPES, Options::default()),
        ColumnFamilyDescriptor::new(CF_ITEMS, Options::default()),
        ColumnFamilyDescriptor::new(CF_ITEM_PROGRESS, Options::default()),
        ColumnFamilyDescriptor::new(CF_RESULTS, results_options()),
        ColumnFamilyDescriptor::new(CF_META, Options::default()),
    ]
}
