//! Request and response models
//!
//! The gateway's own request/response types plus the DTOs serialized by the
//! administrative API.

pub mod admin;
mod request;
mod response;

pub use admin::{
    CachesResponse, ClearCacheResponse, HealthResponse, MaintenanceResponse, PartitionStatus,
    PrefetchResponse, StatsResponse, UpdateCheckResponse, UpdateResponse,
};
pub use request::{CacheRequest, Destination};
pub use response::{GatewayResponse, ResponseSource, SOURCE_HEADER};
