//! Request Key Module
//!
//! Normalized request identity used to key cache entries.

use std::fmt;

use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

// == Request Key ==
/// `METHOD url` with the fragment removed and cache-busting query parameters
/// stripped. All other query parameters are significant and kept in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    /// Builds the key for `method` + `url`, dropping any query parameter whose
    /// name appears in `strip_params`.
    pub fn new(method: &Method, url: &Url, strip_params: &[String]) -> Self {
        let mut normalized = url.clone();
        normalized.set_fragment(None);

        if normalized.query().is_some() {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(name, _)| !strip_params.iter().any(|p| p == name))
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect();

            if kept.is_empty() {
                normalized.set_query(None);
            } else {
                normalized.query_pairs_mut().clear().extend_pairs(kept);
            }
        }

        RequestKey(format!("{} {}", method.as_str(), normalized))
    }

    /// Key for a GET of `url` with no parameters stripped.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url, &[])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URL part of the key.
    pub fn url(&self) -> &str {
        self.0.split_once(' ').map(|(_, url)| url).unwrap_or(&self.0)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestKey {
    fn from(value: &str) -> Self {
        RequestKey(value.to_string())
    }
}
