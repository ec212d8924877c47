//! Cache Statistics Module
//!
//! Counts every read and write that reaches the store. Counters are atomic so
//! reads can be recorded under a shared lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    write_failures: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Copies the counters together with the current entry/partition counts.
    pub fn snapshot(&self, total_entries: usize, partitions: usize) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            total_entries,
            partitions,
        }
    }
}

// == Stats Snapshot ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub write_failures: u64,
    pub total_entries: usize,
    pub partitions: usize,
}

impl StatsSnapshot {
    /// Total lookups that reached the store.
    pub fn reads(&self) -> u64 {
        self.hits + self.misses
    }

    /// Returns hits / (hits + misses), or 0.0 if nothing was read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.reads();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
