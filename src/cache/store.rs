//! Cache Store Module
//!
//! Named partitions of cached responses, optionally mirrored to disk.
//! Every mutation goes through `put`/`delete`/`delete_partition`; each is
//! applied in full under the caller's write lock or not at all. Disk copies
//! are queued to a `MirrorWriter` and written after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::writer::MirrorOp;
use crate::cache::{
    validate_partition_name, CacheEntry, CacheStats, DiskMirror, MirrorWriter, Partition,
    RequestKey, StatsSnapshot,
};
use crate::classify::RouteClass;
use crate::error::{GatewayError, Result};

/// Store handle shared by the gateway, strategies and lifecycle manager.
pub type SharedStore = Arc<RwLock<CacheStore>>;

/// Metadata of one stored entry, without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: RequestKey,
    pub route_class: RouteClass,
    pub cached_at: u64,
}

// == Cache Store ==
#[derive(Debug)]
pub struct CacheStore {
    /// Open partitions by name
    partitions: HashMap<String, Partition>,
    /// Read/write counters, shared with the mirror writer
    stats: Arc<CacheStats>,
    /// Hard entry bound per partition
    partition_capacity: usize,
    /// Largest body accepted by `put`
    max_body_bytes: usize,
    /// Queue to the optional on-disk copy
    mirror: Option<MirrorWriter>,
}

impl CacheStore {
    // == Constructor ==
    /// Creates an in-memory store.
    ///
    /// # Arguments
    /// * `partition_capacity` - Maximum number of entries per partition
    /// * `max_body_bytes` - Largest response body that may be stored
    pub fn new(partition_capacity: usize, max_body_bytes: usize) -> Self {
        Self {
            partitions: HashMap::new(),
            stats: Arc::new(CacheStats::new()),
            partition_capacity,
            max_body_bytes,
            mirror: None,
        }
    }

    /// Creates a store backed by `mirror`, loading every partition already on
    /// disk. Starts the mirror writer, so it must run inside a tokio runtime.
    pub fn with_mirror(
        partition_capacity: usize,
        max_body_bytes: usize,
        mirror: DiskMirror,
    ) -> Result<Self> {
        let mut store = Self::new(partition_capacity, max_body_bytes);

        for loaded in mirror.load()? {
            if validate_partition_name(&loaded.name).is_err() {
                warn!(name = %loaded.name, "Ignoring directory that is not a partition");
                continue;
            }
            info!(
                partition = %loaded.name,
                entries = loaded.entries.len(),
                discarded = loaded.discarded,
                "Restored partition from disk"
            );
            store.partitions.insert(
                loaded.name,
                Partition::restore(partition_capacity, loaded.entries),
            );
        }

        store.mirror = Some(MirrorWriter::spawn(mirror, Arc::clone(&store.stats)));
        Ok(store)
    }

    /// Wraps the store for sharing across tasks.
    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    // == Partitions ==
    /// Opens a partition, creating it if absent. Returns true if it was created.
    pub fn open(&mut self, name: &str) -> Result<bool> {
        validate_partition_name(name)?;
        if self.partitions.contains_key(name) {
            return Ok(false);
        }
        self.mirror_op(|| MirrorOp::CreatePartition(name.to_string()));
        self.partitions
            .insert(name.to_string(), Partition::new(self.partition_capacity));
        debug!(partition = name, "Opened partition");
        Ok(true)
    }

    pub fn has_partition(&self, name: &str) -> bool {
        self.partitions.contains_key(name)
    }

    /// Names of all partitions, sorted.
    pub fn partition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partitions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Deletes a partition and all of its entries. Returns false if it did not exist.
    pub fn delete_partition(&mut self, name: &str) -> Result<bool> {
        if self.partitions.remove(name).is_none() {
            return Ok(false);
        }
        self.mirror_op(|| MirrorOp::RemovePartition(name.to_string()));
        Ok(true)
    }

    // == Put ==
    /// Stores `entry` in `partition`, replacing any entry under the same key
    /// unless the stored one has a later `cached_at` (last write wins by
    /// wall clock, not by arrival).
    ///
    /// Fails with `CacheUnavailable` when the partition is not open (for
    /// instance deleted by activation while the write was in flight) or when
    /// the body is too large. Disk mirror failures are counted by the writer.
    pub fn put(&mut self, partition: &str, entry: CacheEntry) -> Result<()> {
        if entry.body_len() > self.max_body_bytes {
            self.stats.record_write_failure();
            return Err(GatewayError::CacheUnavailable(format!(
                "entry of {} bytes exceeds limit of {} bytes",
                entry.body_len(),
                self.max_body_bytes
            )));
        }

        let Some(target) = self.partitions.get_mut(partition) else {
            self.stats.record_write_failure();
            return Err(GatewayError::CacheUnavailable(format!(
                "partition '{}' is not open",
                partition
            )));
        };

        if let Some(stored) = target.get(&entry.key) {
            if stored.cached_at > entry.cached_at {
                debug!(
                    partition,
                    key = %entry.key,
                    stored_at = stored.cached_at,
                    incoming_at = entry.cached_at,
                    "Dropping write older than stored entry"
                );
                return Ok(());
            }
        }

        let key = entry.key.clone();
        let disk_copy = self.mirror.as_ref().map(|_| entry.clone());
        let inserted = target.insert(entry);
        self.stats.record_write();

        if let (Some(mirror), Some(entry)) = (&self.mirror, disk_copy) {
            mirror.submit(MirrorOp::Write {
                partition: partition.to_string(),
                entry,
                sequence: inserted.sequence,
            });
        }

        if let Some(evicted) = inserted.evicted {
            self.stats.record_eviction();
            debug!(partition, key = %evicted, "Evicted oldest entry at capacity");
            self.mirror_op(|| MirrorOp::Remove {
                partition: partition.to_string(),
                key: evicted,
            });
        }

        debug!(partition, key = %key, "Stored entry");
        Ok(())
    }

    // == Match ==
    /// Looks up `key` in one partition.
    pub fn match_entry(&self, partition: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
        let Some(target) = self.partitions.get(partition) else {
            self.stats.record_miss();
            return Err(GatewayError::CacheUnavailable(format!(
                "partition '{}' is not open",
                partition
            )));
        };

        let found = target.get(key).cloned();
        if found.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        Ok(found)
    }

    /// Looks up `key` in each partition in turn, skipping partitions that
    /// are not open. Counts as a single read.
    pub fn match_any(&self, partitions: &[&str], key: &RequestKey) -> Option<CacheEntry> {
        let found = partitions
            .iter()
            .filter_map(|name| self.partitions.get(*name))
            .find_map(|p| p.get(key).cloned());

        if found.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        found
    }

    // == Delete ==
    /// Removes one entry. Returns false if it was not present.
    pub fn delete(&mut self, partition: &str, key: &RequestKey) -> Result<bool> {
        let Some(target) = self.partitions.get_mut(partition) else {
            return Err(GatewayError::CacheUnavailable(format!(
                "partition '{}' is not open",
                partition
            )));
        };

        if target.remove(key).is_none() {
            return Ok(false);
        }
        self.stats.record_delete();

        self.mirror_op(|| MirrorOp::Remove {
            partition: partition.to_string(),
            key: key.clone(),
        });
        Ok(true)
    }

    // == Enumerate ==
    /// Keys of a partition from oldest to newest write.
    pub fn keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
        self.partitions
            .get(partition)
            .map(|p| p.keys_oldest_first())
            .ok_or_else(|| {
                GatewayError::CacheUnavailable(format!("partition '{}' is not open", partition))
            })
    }

    /// Entry metadata of a partition from oldest to newest write.
    pub fn entry_infos(&self, partition: &str) -> Result<Vec<EntryInfo>> {
        self.partitions
            .get(partition)
            .map(|p| {
                p.iter_oldest_first()
                    .map(|e| EntryInfo {
                        key: e.key.clone(),
                        route_class: e.route_class,
                        cached_at: e.cached_at,
                    })
                    .collect()
            })
            .ok_or_else(|| {
                GatewayError::CacheUnavailable(format!("partition '{}' is not open", partition))
            })
    }

    /// Number of entries in a partition (0 when not open).
    pub fn len(&self, partition: &str) -> usize {
        self.partitions.get(partition).map(|p| p.len()).unwrap_or(0)
    }

    pub fn total_entries(&self) -> usize {
        self.partitions.values().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_entries() == 0
    }

    // == Stats ==
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.total_entries(), self.partitions.len())
    }

    /// Records a write that failed before reaching the store.
    pub fn record_write_failure(&self) {
        self.stats.record_write_failure();
    }

    // == Disk Mirror ==
    pub fn mirror_writer(&self) -> Option<MirrorWriter> {
        self.mirror.clone()
    }

    fn mirror_op(&self, op: impl FnOnce() -> MirrorOp) {
        if let Some(mirror) = &self.mirror {
            mirror.submit(op());
        }
    }
}

/// Waits for queued disk writes without holding the store lock.
pub async fn flush_mirror(store: &SharedStore) {
    let writer = store.read().await.mirror_writer();
    if let Some(writer) = writer {
        writer.flush().await;
    }
}
