//! Cache Partition Module
//!
//! A partition is a named, versioned collection of entries (`static-v3`,
//! `runtime-v3`). Within a partition, keys are unique and write order is
//! tracked for trimming.

use std::collections::HashMap;
use std::fmt;

use crate::cache::{CacheEntry, InsertionOrder, RequestKey};
use crate::error::{GatewayError, Result};

// == Partition Name ==
/// `<purpose>-v<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionName {
    purpose: String,
    version: String,
}

impl PartitionName {
    pub fn new(purpose: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            version: version.into(),
        }
    }

    /// Splits a stored partition name at its last `-v`. Returns None for
    /// names that do not follow the `<purpose>-v<version>` layout.
    pub fn parse(name: &str) -> Option<Self> {
        let (purpose, version) = name.rsplit_once("-v")?;
        if purpose.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self::new(purpose, version))
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-v{}", self.purpose, self.version)
    }
}

/// Partition names double as directory names on disk.
pub fn validate_partition_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(GatewayError::InvalidRequest(format!(
            "invalid partition name '{}'",
            name
        )))
    }
}

// == Partition ==
#[derive(Debug)]
pub struct Partition {
    entries: HashMap<RequestKey, CacheEntry>,
    order: InsertionOrder,
    /// Hard bound on entry count; maintenance trims well below it
    capacity: usize,
    next_sequence: u64,
}

/// Outcome of inserting into a partition.
#[derive(Debug, PartialEq, Eq)]
pub struct Inserted {
    /// Monotonic write sequence assigned to the entry
    pub sequence: u64,
    /// Key evicted to stay within capacity, if any
    pub evicted: Option<RequestKey>,
}

impl Partition {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: InsertionOrder::new(),
            capacity: capacity.max(1),
            next_sequence: 0,
        }
    }

    /// Rebuilds a partition from persisted `(sequence, entry)` pairs.
    pub fn restore(capacity: usize, mut entries: Vec<(u64, CacheEntry)>) -> Self {
        entries.sort_by_key(|(sequence, _)| *sequence);
        let mut partition = Self::new(capacity);
        for (sequence, entry) in entries {
            partition.order.record(&entry.key);
            partition.next_sequence = partition.next_sequence.max(sequence + 1);
            partition.entries.insert(entry.key.clone(), entry);
        }
        partition
    }

    pub fn get(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Insert ==
    /// Stores `entry`, replacing any entry under the same key. A new key in a
    /// full partition evicts the oldest-inserted entry first.
    pub fn insert(&mut self, entry: CacheEntry) -> Inserted {
        let mut evicted = None;
        if !self.entries.contains_key(&entry.key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_oldest() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.order.record(&entry.key);
        self.entries.insert(entry.key.clone(), entry);

        Inserted { sequence, evicted }
    }

    pub fn remove(&mut self, key: &RequestKey) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.remove(key);
        }
        removed
    }

    /// Entries from oldest to newest write.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &CacheEntry> {
        self.order.iter().filter_map(|key| self.entries.get(key))
    }

    pub fn keys_oldest_first(&self) -> Vec<RequestKey> {
        self.order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
