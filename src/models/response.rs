//! Outbound response model
//!
//! Every strategy terminates in a `GatewayResponse`, whether it came from the
//! network, from a cache partition or was synthesized as a fallback.

use std::fmt;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;

/// Header carrying where the gateway got the response from.
pub const SOURCE_HEADER: &str = "x-sw-source";

// == Response Source ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    /// Fresh from upstream
    Network,
    /// Served from a cache partition within its max age
    Cache,
    /// Served from a cache partition past its max age, or because upstream failed
    StaleCache,
    /// Synthesized by the gateway
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::StaleCache => "stale-cache",
            ResponseSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Gateway Response ==
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, source: ResponseSource) -> Self {
        Self {
            status,
            headers,
            body,
            source,
        }
    }

    /// Builds a synthesized response with a single content type.
    pub fn synthesized(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Self::new(status, headers, body.into(), ResponseSource::Fallback)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Only complete `200 OK` bodies are cached. A `206 Partial Content`
    /// body stored under the URL's key would be replayed to full requests.
    pub fn is_storable(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
