//! Freshness Policy
//!
//! Decides whether a cached entry is still fresh and which runtime entries a
//! maintenance pass must evict. Pure functions of entry metadata and the
//! current time; the lifecycle manager applies the result to the store.

use std::collections::{HashMap, HashSet};

use crate::cache::{EntryInfo, RequestKey};
use crate::classify::RouteClass;
use crate::config::{Config, RouteTable};

// == Trim Plan ==
/// Keys a maintenance pass evicts, in eviction order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrimPlan {
    /// Entries at or past their class max age
    pub expired: Vec<RequestKey>,
    /// Oldest-inserted entries over a count bound
    pub overflow: Vec<RequestKey>,
}

impl TrimPlan {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.overflow.is_empty()
    }

    pub fn len(&self) -> usize {
        self.expired.len() + self.overflow.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RequestKey> {
        self.expired.iter().chain(self.overflow.iter())
    }
}

// == Freshness Policy ==
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    routes: RouteTable,
    runtime_max_entries: usize,
}

impl FreshnessPolicy {
    pub fn new(routes: RouteTable, runtime_max_entries: usize) -> Self {
        Self {
            routes,
            runtime_max_entries,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.routes.clone(), config.runtime_max_entries)
    }

    pub fn max_age_ms(&self, class: RouteClass) -> u64 {
        self.routes.for_class(class).max_age_ms()
    }

    // == Plan Maintenance ==
    /// Selects runtime entries to evict. `entries` must be ordered oldest
    /// insertion first.
    ///
    /// 1. Entries whose age reached their class max age.
    /// 2. Per class, the oldest survivors beyond the class `max_entries`.
    /// 3. The oldest survivors beyond the overall runtime bound.
    pub fn plan_maintenance(&self, entries: &[EntryInfo], now: u64) -> TrimPlan {
        let mut plan = TrimPlan::default();
        let mut survivors: Vec<&EntryInfo> = Vec::with_capacity(entries.len());

        for info in entries {
            if is_fresh_at(info.cached_at, self.max_age_ms(info.route_class), now) {
                survivors.push(info);
            } else {
                plan.expired.push(info.key.clone());
            }
        }

        // Count per class from the newest end so the oldest overflow first
        let mut kept_per_class: HashMap<RouteClass, usize> = HashMap::new();
        let mut over_class: HashSet<&RequestKey> = HashSet::new();
        for info in survivors.iter().rev() {
            let kept = kept_per_class.entry(info.route_class).or_insert(0);
            if *kept >= self.routes.for_class(info.route_class).max_entries {
                over_class.insert(&info.key);
            } else {
                *kept += 1;
            }
        }

        let mut remaining = Vec::with_capacity(survivors.len());
        for info in survivors {
            if over_class.contains(&info.key) {
                plan.overflow.push(info.key.clone());
            } else {
                remaining.push(info);
            }
        }

        let excess = remaining.len().saturating_sub(self.runtime_max_entries);
        plan.overflow
            .extend(remaining.iter().take(excess).map(|info| info.key.clone()));

        plan
    }
}

/// `now - cached_at < max_age_ms`, saturating for clocks that went backwards.
/// An entry exactly `max_age_ms` old is expired.
pub fn is_fresh_at(cached_at: u64, max_age_ms: u64, now: u64) -> bool {
    now.saturating_sub(cached_at) < max_age_ms
}
