//! Administrative API DTOs
//!
//! Response bodies for the `/_sw/` endpoints.

use serde::Serialize;

use crate::cache::{RequestKey, StatsSnapshot};
use crate::lifecycle::{LifecycleState, MaintenanceReport, PrefetchReport, UpdateCheckReport};
use crate::telemetry::TelemetrySnapshot;

/// Number of keys listed per partition by `GET /_sw/caches`.
pub const SAMPLE_KEYS: usize = 10;

/// Response body for `GET /_sw/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" once the cache is active, "starting" before
    pub status: String,
    pub state: LifecycleState,
    /// Cache version the partitions are named after
    pub version: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(state: LifecycleState, version: impl Into<String>) -> Self {
        let status = if state.is_ready() { "healthy" } else { "starting" };
        Self {
            status: status.to_string(),
            state,
            version: version.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for `GET /_sw/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub store: StatsSnapshot,
    pub telemetry: TelemetrySnapshot,
    /// Store hits / (hits + misses)
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(store: StatsSnapshot, telemetry: TelemetrySnapshot) -> Self {
        let hit_rate = store.hit_rate();
        Self {
            store,
            telemetry,
            hit_rate,
        }
    }
}

/// One partition as listed by `GET /_sw/caches`
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatus {
    pub name: String,
    pub entries: usize,
    /// Oldest keys first, at most `SAMPLE_KEYS`
    pub sample_keys: Vec<String>,
}

impl PartitionStatus {
    pub fn new(name: impl Into<String>, keys: &[RequestKey]) -> Self {
        Self {
            name: name.into(),
            entries: keys.len(),
            sample_keys: keys
                .iter()
                .take(SAMPLE_KEYS)
                .map(|k| k.as_str().to_string())
                .collect(),
        }
    }
}

/// Response body for `GET /_sw/caches`
#[derive(Debug, Clone, Serialize)]
pub struct CachesResponse {
    pub version: String,
    pub partitions: Vec<PartitionStatus>,
}

/// Response body for `DELETE /_sw/caches/:name`
#[derive(Debug, Clone, Serialize)]
pub struct ClearCacheResponse {
    pub message: String,
    pub partition: String,
    /// False when there was nothing to delete
    pub existed: bool,
}

impl ClearCacheResponse {
    pub fn new(partition: impl Into<String>, existed: bool) -> Self {
        let partition = partition.into();
        let message = if existed {
            format!("Partition '{}' cleared", partition)
        } else {
            format!("Partition '{}' did not exist", partition)
        };
        Self {
            message,
            partition,
            existed,
        }
    }
}

/// Response body for `POST /_sw/update`
#[derive(Debug, Clone, Serialize)]
pub struct UpdateResponse {
    pub message: String,
    pub partition: String,
}

impl UpdateResponse {
    pub fn new(partition: impl Into<String>) -> Self {
        let partition = partition.into();
        Self {
            message: format!("Runtime cache '{}' reset", partition),
            partition,
        }
    }
}

/// Response body for `POST /_sw/update-check`
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheckResponse {
    pub message: String,
    pub report: UpdateCheckReport,
}

impl UpdateCheckResponse {
    pub fn new(report: UpdateCheckReport) -> Self {
        let message = if report.updated {
            "Page update detected, cached copy refreshed".to_string()
        } else {
            "No update".to_string()
        };
        Self { message, report }
    }
}

/// Response body for `POST /_sw/maintenance`
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceResponse {
    pub message: String,
    pub report: MaintenanceReport,
}

impl MaintenanceResponse {
    pub fn new(report: MaintenanceReport) -> Self {
        let message = if report.skipped {
            "Maintenance skipped".to_string()
        } else {
            format!(
                "Evicted {} entries from '{}'",
                report.expired + report.trimmed,
                report.partition
            )
        };
        Self { message, report }
    }
}

/// Response body for `POST /_sw/prefetch`
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchResponse {
    pub message: String,
    pub report: PrefetchReport,
}

impl PrefetchResponse {
    pub fn new(report: PrefetchReport) -> Self {
        Self {
            message: format!(
                "Prefetched {} assets, {} failed",
                report.cached.len(),
                report.failed.len()
            ),
            report,
        }
    }
}
