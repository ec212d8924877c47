//! Cache Entry Module
//!
//! Defines a stored response together with the metadata needed to judge its
//! freshness.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::cache::RequestKey;
use crate::classify::RouteClass;
use crate::models::{GatewayResponse, ResponseSource};

/// Header added to responses served from cache: write time in Unix milliseconds.
pub const CACHED_AT_HEADER: &str = "x-sw-cached-at";
/// Header added to responses served from cache: route class that stored it.
pub const STRATEGY_HEADER: &str = "x-sw-strategy";

// == Cache Entry ==
/// A stored response. Entries are immutable once written; an update replaces
/// the entry wholesale with a new `cached_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Normalized request identity
    pub key: RequestKey,
    /// Upstream status code
    pub status: u16,
    /// Upstream response headers (non UTF-8 values are dropped)
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
    /// Write timestamp (Unix milliseconds)
    pub cached_at: u64,
    /// Route class the entry was stored under (its strategy tag)
    pub route_class: RouteClass,
}

impl CacheEntry {
    // == Constructor ==
    /// Captures `response` as a new entry stamped with the current time.
    pub fn from_response(key: RequestKey, response: &GatewayResponse, route_class: RouteClass) -> Self {
        Self::from_response_at(key, response, route_class, current_timestamp_ms())
    }

    /// Same as `from_response` with an explicit write timestamp.
    pub fn from_response_at(
        key: RequestKey,
        response: &GatewayResponse,
        route_class: RouteClass,
        cached_at: u64,
    ) -> Self {
        let headers = response
            .headers
            .iter()
            .filter(|(name, _)| !is_unstorable_header(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            key,
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            cached_at,
            route_class,
        }
    }

    // == To Response ==
    /// Rebuilds a response, stamping the cache metadata headers.
    pub fn to_response(&self, source: ResponseSource) -> GatewayResponse {
        let mut headers = HeaderMap::with_capacity(self.headers.len() + 2);
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        headers.insert(CACHED_AT_HEADER, HeaderValue::from(self.cached_at));
        headers.insert(STRATEGY_HEADER, HeaderValue::from_static(self.route_class.as_str()));

        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        GatewayResponse::new(status, headers, self.body.clone(), source)
    }

    /// Approximate memory footprint of the body.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Gateway metadata from a previous hop, and per-client cookies that must
/// not be replayed to every client of the shared cache.
fn is_unstorable_header(name: &str) -> bool {
    name == CACHED_AT_HEADER
        || name == STRATEGY_HEADER
        || name == crate::models::SOURCE_HEADER
        || name == header::SET_COOKIE.as_str()
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
