//! Upstream Fetch
//!
//! The only way the gateway talks to the network. Strategies depend on the
//! `Upstream` trait so tests can substitute a counting mock for the real
//! reqwest client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::error::GatewayError;
use crate::models::{CacheRequest, GatewayResponse, ResponseSource};

#[cfg(test)]
pub(crate) mod mock;

/// Headers that describe one connection and never cross the gateway.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

// == Fetch Error ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("reading body failed: {0}")]
    Body(String),

    #[error("response body exceeds {0} bytes")]
    TooLarge(usize),
}

impl From<FetchError> for GatewayError {
    fn from(err: FetchError) -> Self {
        GatewayError::NetworkUnavailable(err.to_string())
    }
}

// == Upstream Request ==
/// Outbound request built from a client request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    /// Forwards the client's method, URL, end-to-end headers and body.
    pub fn from_request(request: &CacheRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: end_to_end(&request.headers),
            body: request.body.clone(),
        }
    }

    /// Plain GET with no headers, as used by precaching and revalidation.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Adds no-cache directives and the `_t`/`_r` cache-busting parameters
    /// so neither the origin nor an intermediate HTTP cache answers from a
    /// stored copy.
    pub fn bust_cache(mut self, timestamp_ms: u64, sequence: u64) -> Self {
        self.headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        self.headers
            .insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        self.url
            .query_pairs_mut()
            .append_pair("_t", &timestamp_ms.to_string())
            .append_pair("_r", &sequence.to_string());
        self
    }
}

// == Upstream Trait ==
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Performs one fetch. Any HTTP status is a successful fetch; only
    /// transport failures are errors.
    async fn fetch(&self, request: UpstreamRequest) -> Result<GatewayResponse, FetchError>;
}

/// Runs `fetch` bounded by `timeout`; a timeout is reported as a fetch error.
pub async fn fetch_with_timeout(
    upstream: &dyn Upstream,
    request: UpstreamRequest,
    timeout: Duration,
) -> Result<GatewayResponse, FetchError> {
    match tokio::time::timeout(timeout, upstream.fetch(request)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

// == HTTP Upstream ==
/// `Upstream` backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    /// Bodies larger than this are abandoned mid-stream
    max_body_bytes: usize,
}

impl HttpUpstream {
    pub fn new(max_body_bytes: usize) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    /// Buffers the body chunk by chunk, giving up once it passes the limit.
    async fn read_body(&self, mut response: reqwest::Response) -> Result<Bytes, FetchError> {
        let limit = self.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(FetchError::TooLarge(limit));
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?
        {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<GatewayResponse, FetchError> {
        debug!(method = %request.method, url = %request.url, "Fetching upstream");

        let response = self
            .client
            .request(request.method, request.url)
            .headers(end_to_end(&request.headers))
            .body(request.body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        let headers = end_to_end(response.headers());
        let body = self.read_body(response).await?;

        Ok(GatewayResponse::new(status, headers, body, ResponseSource::Network))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(Duration::ZERO)
    } else if err.is_connect() {
        FetchError::Connect(err.to_string())
    } else {
        FetchError::Http(err.to_string())
    }
}

/// Copies `headers` without hop-by-hop fields.
pub fn end_to_end(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}
