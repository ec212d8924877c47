//! Offline Cache - an offline-first caching gateway
//!
//! Sits in front of a web origin, classifies every request into a route
//! class and answers it with that class's caching strategy out of versioned
//! cache partitions.

pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod freshness;
pub mod gateway;
pub mod lifecycle;
pub mod models;
pub mod strategy;
pub mod tasks;
pub mod telemetry;
pub mod upstream;

pub use api::{create_router, AppState};
pub use cache::{CacheStore, SharedStore};
pub use classify::{RequestClassifier, RouteClass};
pub use config::{Config, StrategyKind};
pub use error::{GatewayError, Result};
pub use gateway::InterceptionGateway;
pub use lifecycle::{CacheLifecycleManager, LifecycleState};
pub use models::{CacheRequest, GatewayResponse, ResponseSource};
pub use tasks::{maintenance_channel, spawn_maintenance_timer, spawn_maintenance_worker};
pub use telemetry::{spawn_telemetry_logger, Telemetry};
pub use upstream::{HttpUpstream, Upstream};
