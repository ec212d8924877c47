//! Outstanding revalidations for stale-while-revalidate.
//!
//! A registry of keys with a background fetch in flight. Claiming a key is
//! an atomic check-and-insert on the map entry, so concurrent handlers for
//! the same key start at most one fetch.

use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::cache::RequestKey;

// == Revalidation Registry ==
#[derive(Debug, Clone, Default)]
pub struct RevalidationRegistry {
    in_flight: Arc<DashMap<RequestKey, Instant>>,
}

impl RevalidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key` for one background fetch. Returns None when a fetch for
    /// the key is already outstanding.
    pub fn try_begin(&self, key: &RequestKey) -> Option<RevalidationGuard> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!(key = %key, "Revalidation already in flight");
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(RevalidationGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    key: key.clone(),
                })
            }
        }
    }

    pub fn is_pending(&self, key: &RequestKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

// == Revalidation Guard ==
/// Releases the key when dropped, whether the fetch succeeded, failed or
/// the task was aborted.
#[derive(Debug)]
pub struct RevalidationGuard {
    in_flight: Arc<DashMap<RequestKey, Instant>>,
    key: RequestKey,
}

impl RevalidationGuard {
    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Time since the key was claimed.
    pub fn elapsed_ms(&self) -> u64 {
        self.in_flight
            .get(&self.key)
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Drop for RevalidationGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}
