//! Cache Module
//!
//! Provides the versioned response store: named partitions of entries,
//! insertion-order trimming and an optional on-disk mirror written in the
//! background.

mod entry;
mod key;
mod order;
mod partition;
mod persist;
mod stats;
mod store;
mod writer;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry, CACHED_AT_HEADER, STRATEGY_HEADER};
pub use key::RequestKey;
pub use order::InsertionOrder;
pub use partition::{validate_partition_name, Inserted, Partition, PartitionName};
pub use persist::{DiskMirror, LoadedPartition};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{flush_mirror, CacheStore, EntryInfo, SharedStore};
pub use writer::MirrorWriter;

// == Public Constants ==
/// Hard bound on entries per partition, independent of maintenance trimming
pub const DEFAULT_PARTITION_CAPACITY: usize = 10_000;

/// Maximum allowed response body size in bytes
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024; // 5 MiB
