//! Request Classification
//!
//! Sorts every request into a `RouteClass` before a caching strategy is
//! chosen. Classification is a pure function of the request's method, URL
//! and destination; rules are evaluated top to bottom and the first match
//! wins.

use std::fmt;

use http::Method;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use url::{Origin, Url};

use crate::cache::RequestKey;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::models::CacheRequest;

// == Route Class ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteClass {
    Navigation,
    StaticAsset,
    Image,
    Font,
    Api,
    External,
    NeverCache,
    /// Non-GET or non-fetchable scheme: always network, never stored
    Passthrough,
}

impl RouteClass {
    pub const ALL: [RouteClass; 8] = [
        RouteClass::Navigation,
        RouteClass::StaticAsset,
        RouteClass::Image,
        RouteClass::Font,
        RouteClass::Api,
        RouteClass::External,
        RouteClass::NeverCache,
        RouteClass::Passthrough,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Navigation => "navigation",
            RouteClass::StaticAsset => "static-asset",
            RouteClass::Image => "image",
            RouteClass::Font => "font",
            RouteClass::Api => "api",
            RouteClass::External => "external",
            RouteClass::NeverCache => "never-cache",
            RouteClass::Passthrough => "passthrough",
        }
    }

    /// Whether responses of this class may ever be read from or written to
    /// the cache store.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, RouteClass::NeverCache | RouteClass::Passthrough)
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default image extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "avif"];

/// Default font extensions.
pub const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];

// == Request Classifier ==
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    never_cache: RegexSet,
    image_extensions: Vec<String>,
    font_extensions: Vec<String>,
    api_prefix: String,
    origin: Origin,
    cache_busting_params: Vec<String>,
}

impl RequestClassifier {
    /// Compiles the never-cache pattern set and captures the application origin.
    pub fn new(config: &Config) -> Result<Self> {
        let never_cache = RegexSet::new(&config.never_cache_patterns)
            .map_err(|e| GatewayError::Config(format!("invalid never-cache pattern: {}", e)))?;

        Ok(Self {
            never_cache,
            image_extensions: IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            font_extensions: FONT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            api_prefix: config.api_prefix.clone(),
            origin: config.upstream_origin.origin(),
            cache_busting_params: config.cache_busting_params.clone(),
        })
    }

    // == Classify ==
    /// Maps a request to its route class. Total: anything unmatched is `External`.
    pub fn classify(&self, request: &CacheRequest) -> RouteClass {
        let url = &request.url;
        let path = url.path();

        if self.never_cache.is_match(path) {
            return RouteClass::NeverCache;
        }

        if request.method != Method::GET || !is_fetchable(url) {
            return RouteClass::Passthrough;
        }

        if request.destination.is_document() {
            return RouteClass::Navigation;
        }

        match extension(path) {
            Some(ext) if self.image_extensions.iter().any(|e| e == &ext) => {
                return RouteClass::Image
            }
            Some(ext) if self.font_extensions.iter().any(|e| e == &ext) => return RouteClass::Font,
            _ => {}
        }

        if path.contains(&self.api_prefix) {
            return RouteClass::Api;
        }

        if url.origin() == self.origin {
            return RouteClass::StaticAsset;
        }

        RouteClass::External
    }

    /// Normalized cache key for the request.
    pub fn request_key(&self, request: &CacheRequest) -> RequestKey {
        RequestKey::new(&request.method, &request.url, &self.cache_busting_params)
    }

    /// Resolves a manifest path against the application origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        let base = Url::parse(&self.origin.ascii_serialization())
            .map_err(|e| GatewayError::Config(format!("origin is not a base url: {}", e)))?;
        base.join(path)
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid path '{}': {}", path, e)))
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin
    }
}

fn is_fetchable(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
