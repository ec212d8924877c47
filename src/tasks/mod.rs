//! Background Tasks Module
//!
//! Contains background tasks that run during gateway operation.
//!
//! # Tasks
//! - Maintenance: a timer enqueues maintenance jobs on a bounded channel and
//!   a single worker runs them against the lifecycle manager

mod maintenance;

pub use maintenance::{
    maintenance_channel, spawn_maintenance_timer, spawn_maintenance_worker, MaintenanceHandle,
    MaintenanceJob, MaintenanceTrigger,
};
