//! API Module
//!
//! HTTP surface of the gateway.
//!
//! # Endpoints
//! - `GET /_sw/health` - Lifecycle state and cache version
//! - `GET /_sw/stats` - Store and telemetry counters
//! - `GET /_sw/caches` - Partitions with entry counts and sample keys
//! - `DELETE /_sw/caches/:name` - Clear one partition
//! - `POST /_sw/update` - Reset the runtime partition
//! - `POST /_sw/update-check` - Refetch the main page and refresh its cached copy if changed
//! - `POST /_sw/maintenance` - Run a maintenance pass and return its report
//! - `POST /_sw/prefetch` - Fetch precache assets missing from the static partition
//! - anything else - Classified and answered by the interception gateway

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
