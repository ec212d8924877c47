//! Inbound request model
//!
//! A `CacheRequest` is everything the gateway knows about one client fetch:
//! method, absolute URL, headers, body and the declared destination.

use bytes::Bytes;
use http::{header, HeaderMap, Method};
use url::Url;

use crate::error::{GatewayError, Result};

// == Destination ==
/// What the client intends to do with the response (the `Sec-Fetch-Dest` hint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Image,
    Font,
    Style,
    Script,
    Empty,
    Other,
}

impl Destination {
    /// Parses a `Sec-Fetch-Dest` header value.
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "style" => Destination::Style,
            "script" | "worker" | "sharedworker" | "serviceworker" => Destination::Script,
            "" | "empty" => Destination::Empty,
            _ => Destination::Other,
        }
    }

    /// Infers the destination from request headers.
    ///
    /// `Sec-Fetch-Dest` wins when present. Otherwise a GET that is a
    /// navigation (`Sec-Fetch-Mode: navigate`) or prefers `text/html` is a
    /// document load.
    pub fn infer(method: &Method, headers: &HeaderMap) -> Self {
        if let Some(dest) = header_str(headers, "sec-fetch-dest") {
            return Destination::from_header(dest);
        }

        if method != Method::GET {
            return Destination::Empty;
        }

        let navigating = header_str(headers, "sec-fetch-mode")
            .map(|mode| mode.eq_ignore_ascii_case("navigate"))
            .unwrap_or(false);
        let wants_html = header_str(headers, header::ACCEPT.as_str())
            .map(|accept| accept.starts_with("text/html"))
            .unwrap_or(false);

        if navigating || wants_html {
            Destination::Document
        } else {
            Destination::Empty
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Destination::Document)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// == Cache Request ==
/// A client request as seen by the interception gateway.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub destination: Destination,
    pub body: Bytes,
}

impl CacheRequest {
    /// Creates a request with empty headers and body.
    pub fn new(method: Method, url: Url, destination: Destination) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            destination,
            body: Bytes::new(),
        }
    }

    /// Parses `url` and creates a plain GET request.
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid url '{}': {}", url, e)))?;
        Ok(Self::new(Method::GET, url, Destination::Empty))
    }

    /// Parses `url` and creates a document navigation request.
    pub fn navigate(url: &str) -> Result<Self> {
        Ok(Self::get(url)?.with_destination(Destination::Document))
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Whether the client asked for a byte range rather than the whole body.
    pub fn is_range(&self) -> bool {
        self.headers.contains_key(header::RANGE)
    }

    /// Returns the URL path (never empty).
    pub fn path(&self) -> &str {
        self.url.path()
    }
}
