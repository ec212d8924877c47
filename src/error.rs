//! Error types for the caching gateway
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Gateway Error Enum ==
/// Unified error type for the caching gateway.
///
/// Most variants never reach a client: strategies recover from them locally
/// and answer with a cached copy or a synthesized fallback. They surface only
/// through the administrative API and in logs.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Upstream fetch failed (timeout, DNS, connection refused)
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The cache store is full, corrupted or inaccessible
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A precache manifest asset could not be fetched during install
    #[error("Precache failed for {path}: {reason}")]
    ManifestFetchFailed { path: String, reason: String },

    /// A strategy task panicked or was cancelled
    #[error("Strategy failed: {0}")]
    UnhandledStrategy(String),

    /// Lifecycle transition attempted out of order
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Startup configuration could not be used
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::NetworkUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ManifestFetchFailed { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidTransition { .. } => StatusCode::CONFLICT,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnhandledStrategy(_)
            | GatewayError::Config(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::CacheUnavailable(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;
