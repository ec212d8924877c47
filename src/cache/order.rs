//! Insertion Order Module
//!
//! Tracks write order within a partition for trimming. Reads never reorder:
//! eviction is oldest-inserted first, not least-recently-used.

use std::collections::{BTreeMap, HashMap};

use crate::cache::RequestKey;

// == Insertion Order ==
/// Keys indexed by a private write counter:
/// - `by_sequence` iterates oldest write first
/// - `sequence_of` finds a key's slot without scanning
#[derive(Debug, Default, Clone)]
pub struct InsertionOrder {
    by_sequence: BTreeMap<u64, RequestKey>,
    sequence_of: HashMap<RequestKey, u64>,
    next: u64,
}

impl InsertionOrder {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Write ==
    /// Marks a key as the newest write.
    ///
    /// A rewrite of an existing key replaces the entry, so the key moves to
    /// the back.
    pub fn record(&mut self, key: &RequestKey) {
        let sequence = self.next;
        self.next += 1;
        if let Some(previous) = self.sequence_of.insert(key.clone(), sequence) {
            self.by_sequence.remove(&previous);
        }
        self.by_sequence.insert(sequence, key.clone());
    }

    // == Remove ==
    pub fn remove(&mut self, key: &RequestKey) {
        if let Some(sequence) = self.sequence_of.remove(key) {
            self.by_sequence.remove(&sequence);
        }
    }

    // == Pop Oldest ==
    /// Returns and removes the oldest-inserted key.
    pub fn pop_oldest(&mut self) -> Option<RequestKey> {
        let (_, key) = self.by_sequence.pop_first()?;
        self.sequence_of.remove(&key);
        Some(key)
    }

    /// Keys from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RequestKey> {
        self.by_sequence.values()
    }
}
