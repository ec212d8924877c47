//! Configuration Module
//!
//! Handles loading gateway configuration from environment variables. Values
//! are read once at startup and never mutated afterwards.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::cache::{validate_partition_name, DEFAULT_MAX_BODY_BYTES, DEFAULT_PARTITION_CAPACITY};
use crate::classify::RouteClass;
use crate::error::{GatewayError, Result};

const DAY_SECS: u64 = 24 * 60 * 60;

// == Strategy Kind ==
/// Caching algorithm applied to a route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    NetworkFirst,
    CacheFirst,
    StaleWhileRevalidate,
    NeverCache,
    Navigation,
    /// Always network, never stored
    NetworkOnly,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::NetworkFirst => "network-first",
            StrategyKind::CacheFirst => "cache-first",
            StrategyKind::StaleWhileRevalidate => "stale-while-revalidate",
            StrategyKind::NeverCache => "never-cache",
            StrategyKind::Navigation => "navigation",
            StrategyKind::NetworkOnly => "network-only",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "networkfirst" => Ok(StrategyKind::NetworkFirst),
            "cachefirst" => Ok(StrategyKind::CacheFirst),
            "stalewhilerevalidate" | "swr" => Ok(StrategyKind::StaleWhileRevalidate),
            "nevercache" => Ok(StrategyKind::NeverCache),
            "navigation" => Ok(StrategyKind::Navigation),
            "networkonly" => Ok(StrategyKind::NetworkOnly),
            _ => Err(GatewayError::Config(format!("unknown strategy '{}'", s))),
        }
    }
}

// == Strategy Config ==
/// Strategy and bounds for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    /// Entries older than this are stale (inclusive boundary)
    pub max_age: Duration,
    /// Maintenance trims the class down to this many runtime entries
    pub max_entries: usize,
    /// Bound on each upstream fetch
    pub timeout: Duration,
}

impl StrategyConfig {
    pub fn new(kind: StrategyKind, max_age: Duration, max_entries: usize, timeout: Duration) -> Self {
        Self {
            kind,
            max_age,
            max_entries,
            timeout,
        }
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age.as_millis() as u64
    }
}

// == Route Table ==
/// One `StrategyConfig` per route class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    pub navigation: StrategyConfig,
    pub static_asset: StrategyConfig,
    pub image: StrategyConfig,
    pub font: StrategyConfig,
    pub api: StrategyConfig,
    pub external: StrategyConfig,
    pub never_cache: StrategyConfig,
    pub passthrough: StrategyConfig,
}

impl RouteTable {
    pub fn for_class(&self, class: RouteClass) -> &StrategyConfig {
        match class {
            RouteClass::Navigation => &self.navigation,
            RouteClass::StaticAsset => &self.static_asset,
            RouteClass::Image => &self.image,
            RouteClass::Font => &self.font,
            RouteClass::Api => &self.api,
            RouteClass::External => &self.external,
            RouteClass::NeverCache => &self.never_cache,
            RouteClass::Passthrough => &self.passthrough,
        }
    }

    /// Default table built from the three upstream timeouts.
    pub fn with_timeouts(navigation: Duration, fetch: Duration, media: Duration) -> Self {
        Self {
            navigation: StrategyConfig::new(
                StrategyKind::Navigation,
                Duration::from_secs(DAY_SECS),
                50,
                navigation,
            ),
            static_asset: StrategyConfig::new(
                StrategyKind::CacheFirst,
                Duration::from_secs(7 * DAY_SECS),
                100,
                fetch,
            ),
            image: StrategyConfig::new(
                StrategyKind::CacheFirst,
                Duration::from_secs(30 * DAY_SECS),
                100,
                media,
            ),
            font: StrategyConfig::new(
                StrategyKind::CacheFirst,
                Duration::from_secs(365 * DAY_SECS),
                30,
                media,
            ),
            api: StrategyConfig::new(
                StrategyKind::NetworkFirst,
                Duration::from_secs(5 * 60),
                50,
                fetch,
            ),
            external: StrategyConfig::new(
                StrategyKind::StaleWhileRevalidate,
                Duration::from_secs(DAY_SECS),
                200,
                fetch,
            ),
            never_cache: StrategyConfig::new(StrategyKind::NeverCache, Duration::ZERO, 0, fetch),
            passthrough: StrategyConfig::new(StrategyKind::NetworkOnly, Duration::ZERO, 0, fetch),
        }
    }

    /// Applies `<CLASS>_STRATEGY`, `<CLASS>_MAX_AGE_SECS` and
    /// `<CLASS>_MAX_ENTRIES` overrides.
    fn apply_env(&mut self) -> Result<()> {
        for (prefix, target) in [
            ("NAVIGATION", &mut self.navigation),
            ("STATIC", &mut self.static_asset),
            ("IMAGE", &mut self.image),
            ("FONT", &mut self.font),
            ("API", &mut self.api),
            ("EXTERNAL", &mut self.external),
        ] {
            if let Ok(kind) = env::var(format!("{}_STRATEGY", prefix)) {
                target.kind = kind.parse()?;
            }
            if let Some(secs) = env_parse::<u64>(&format!("{}_MAX_AGE_SECS", prefix)) {
                target.max_age = Duration::from_secs(secs);
            }
            if let Some(max) = env_parse::<usize>(&format!("{}_MAX_ENTRIES", prefix)) {
                target.max_entries = max;
            }
        }
        Ok(())
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::with_timeouts(
            Duration::from_millis(DEFAULT_NAVIGATION_TIMEOUT_MS),
            Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            Duration::from_millis(DEFAULT_MEDIA_TIMEOUT_MS),
        )
    }
}

const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8080";
const DEFAULT_MANIFEST: &[&str] = &[
    "/offline.html",
    "/manifest.json",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];
const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";
const DEFAULT_NEVER_CACHE: &[&str] = &[r"(^|/)index\.html$", r"\.js$"];
const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_MEDIA_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_UPSTREAM_MAX_BODY_BYTES: usize = 32 * 1024 * 1024; // 32 MiB

/// Gateway configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache generation tag; partitions are named `<purpose>-v<version>`
    pub version: String,
    /// Application origin requests are resolved against
    pub upstream_origin: Url,
    /// HTTP server port
    pub server_port: u16,
    /// Paths fetched into the static partition on install
    pub precache_manifest: Vec<String>,
    /// Document served when a navigation has neither network nor cache
    pub offline_page: String,
    /// Placeholder served for images that are unavailable
    pub offline_image: Option<String>,
    /// Regexes over the URL path that select `NeverCache`
    pub never_cache_patterns: Vec<String>,
    /// Path fragment that selects `Api`
    pub api_prefix: String,
    /// Query parameters ignored when building cache keys
    pub cache_busting_params: Vec<String>,
    /// Enables the on-disk mirror when set
    pub data_dir: Option<PathBuf>,
    /// Background maintenance interval in seconds
    pub maintenance_interval: u64,
    /// Overall bound on runtime partition entries
    pub runtime_max_entries: usize,
    /// Hard bound per partition enforced by the store
    pub partition_capacity: usize,
    /// Largest body the store accepts
    pub max_body_bytes: usize,
    /// Largest upstream response body the gateway will buffer
    pub upstream_max_body_bytes: usize,
    /// Per route class strategy and bounds
    pub routes: RouteTable,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `UPSTREAM_ORIGIN` - Application origin (default: http://127.0.0.1:8080)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_VERSION` - Cache generation (default: 1)
    /// - `PRECACHE_MANIFEST` - Comma separated paths
    /// - `OFFLINE_PAGE` / `OFFLINE_IMAGE` - Offline fallback assets
    /// - `NEVER_CACHE_PATTERNS` - Comma separated path regexes
    /// - `API_PREFIX` - API path prefix (default: /api/)
    /// - `CACHE_BUSTING_PARAMS` - Query params stripped from keys (default: _t,_r)
    /// - `DATA_DIR` - Directory for the on-disk mirror
    /// - `MAINTENANCE_INTERVAL` - Maintenance frequency in seconds (default: 300)
    /// - `RUNTIME_MAX_ENTRIES` - Runtime partition bound (default: 200)
    /// - `NAVIGATION_TIMEOUT_MS`, `FETCH_TIMEOUT_MS`, `MEDIA_TIMEOUT_MS`
    /// - `MAX_BODY_BYTES` - Largest cacheable body (default: 5 MiB)
    /// - `UPSTREAM_MAX_BODY_BYTES` - Largest proxied body (default: 32 MiB)
    /// - `<CLASS>_STRATEGY`, `<CLASS>_MAX_AGE_SECS`, `<CLASS>_MAX_ENTRIES`
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let upstream_origin = match env::var("UPSTREAM_ORIGIN") {
            Ok(origin) => parse_origin(&origin)?,
            Err(_) => defaults.upstream_origin,
        };

        let mut routes = RouteTable::with_timeouts(
            env_millis("NAVIGATION_TIMEOUT_MS", DEFAULT_NAVIGATION_TIMEOUT_MS),
            env_millis("FETCH_TIMEOUT_MS", DEFAULT_FETCH_TIMEOUT_MS),
            env_millis("MEDIA_TIMEOUT_MS", DEFAULT_MEDIA_TIMEOUT_MS),
        );
        routes.apply_env()?;

        let offline_page = env::var("OFFLINE_PAGE").unwrap_or(defaults.offline_page);
        let offline_image = env::var("OFFLINE_IMAGE").ok().filter(|s| !s.is_empty());
        let manifest = env::var("PRECACHE_MANIFEST")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.precache_manifest);

        let version = match env::var("CACHE_VERSION") {
            Ok(version) => parse_version(version)?,
            Err(_) => defaults.version,
        };

        Ok(Self {
            version,
            upstream_origin,
            server_port: env_parse("SERVER_PORT").unwrap_or(defaults.server_port),
            precache_manifest: with_offline_assets(manifest, &offline_page, offline_image.as_deref()),
            offline_page,
            offline_image,
            never_cache_patterns: env::var("NEVER_CACHE_PATTERNS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.never_cache_patterns),
            api_prefix: env::var("API_PREFIX").unwrap_or(defaults.api_prefix),
            cache_busting_params: env::var("CACHE_BUSTING_PARAMS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.cache_busting_params),
            data_dir: env::var("DATA_DIR").ok().filter(|s| !s.is_empty()).map(PathBuf::from),
            maintenance_interval: env_parse("MAINTENANCE_INTERVAL")
                .unwrap_or(defaults.maintenance_interval),
            runtime_max_entries: env_parse("RUNTIME_MAX_ENTRIES")
                .unwrap_or(defaults.runtime_max_entries),
            partition_capacity: defaults.partition_capacity,
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            upstream_max_body_bytes: env_parse("UPSTREAM_MAX_BODY_BYTES")
                .unwrap_or(defaults.upstream_max_body_bytes),
            routes,
        })
    }

    /// Default configuration pointed at another origin.
    pub fn for_origin(origin: &str) -> Result<Self> {
        Ok(Self {
            upstream_origin: parse_origin(origin)?,
            ..Self::default()
        })
    }

    /// Partition holding the precache manifest.
    pub fn static_partition(&self) -> String {
        format!("static-v{}", self.version)
    }

    /// Partition holding everything cached at request time.
    pub fn runtime_partition(&self) -> String {
        format!("runtime-v{}", self.version)
    }

    pub fn strategy_for(&self, class: RouteClass) -> &StrategyConfig {
        self.routes.for_class(class)
    }
}

impl Default for Config {
    fn default() -> Self {
        let offline_page = DEFAULT_OFFLINE_PAGE.to_string();
        let manifest = DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect();

        Self {
            version: "1".to_string(),
            upstream_origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid url"),
            server_port: 3000,
            precache_manifest: with_offline_assets(manifest, &offline_page, None),
            offline_page,
            offline_image: None,
            never_cache_patterns: DEFAULT_NEVER_CACHE.iter().map(|s| s.to_string()).collect(),
            api_prefix: "/api/".to_string(),
            cache_busting_params: vec!["_t".to_string(), "_r".to_string()],
            data_dir: None,
            maintenance_interval: 300,
            runtime_max_entries: 200,
            partition_capacity: DEFAULT_PARTITION_CAPACITY,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            upstream_max_body_bytes: DEFAULT_UPSTREAM_MAX_BODY_BYTES,
            routes: RouteTable::default(),
        }
    }
}

fn parse_origin(origin: &str) -> Result<Url> {
    let url = Url::parse(origin)
        .map_err(|e| GatewayError::Config(format!("invalid UPSTREAM_ORIGIN '{}': {}", origin, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(GatewayError::Config(format!(
            "UPSTREAM_ORIGIN must be an http(s) origin, got '{}'",
            origin
        )));
    }
    Ok(url)
}

/// The version ends up in partition names, which are also directory names.
fn parse_version(version: String) -> Result<String> {
    let version = version.trim().to_string();
    if version.is_empty() {
        return Err(GatewayError::Config("CACHE_VERSION must not be empty".to_string()));
    }
    validate_partition_name(&format!("static-v{}", version)).map_err(|_| {
        GatewayError::Config(format!(
            "CACHE_VERSION '{}' may only contain ASCII letters, digits, '.', '_' and '-'",
            version
        ))
    })?;
    Ok(version)
}

/// The offline assets are always part of the manifest.
fn with_offline_assets(
    mut manifest: Vec<String>,
    offline_page: &str,
    offline_image: Option<&str>,
) -> Vec<String> {
    for asset in std::iter::once(offline_page).chain(offline_image) {
        if !manifest.iter().any(|p| p == asset) {
            manifest.push(asset.to_string());
        }
    }
    manifest
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_millis(name: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(name).unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.version, "1");
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.upstream_origin.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(config.maintenance_interval, 300);
        assert_eq!(config.runtime_max_entries, 200);
        assert_eq!(config.static_partition(), "static-v1");
        assert_eq!(config.runtime_partition(), "runtime-v1");
        assert!(config.precache_manifest.contains(&"/offline.html".to_string()));
    }

    #[test]
    fn test_default_route_table() {
        let routes = RouteTable::default();
        assert_eq!(routes.for_class(RouteClass::Image).kind, StrategyKind::CacheFirst);
        assert_eq!(routes.for_class(RouteClass::Api).kind, StrategyKind::NetworkFirst);
        assert_eq!(
            routes.for_class(RouteClass::External).kind,
            StrategyKind::StaleWhileRevalidate
        );
        assert_eq!(routes.for_class(RouteClass::NeverCache).kind, StrategyKind::NeverCache);
        assert_eq!(routes.for_class(RouteClass::Passthrough).kind, StrategyKind::NetworkOnly);
        assert_eq!(routes.for_class(RouteClass::Api).max_age, Duration::from_secs(300));
        assert_eq!(routes.for_class(RouteClass::Font).max_entries, 30);
        assert_eq!(
            routes.for_class(RouteClass::Image).timeout,
            Duration::from_millis(DEFAULT_MEDIA_TIMEOUT_MS)
        );
        assert_eq!(
            routes.for_class(RouteClass::Navigation).timeout,
            Duration::from_millis(DEFAULT_NAVIGATION_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("cache-first".parse::<StrategyKind>().unwrap(), StrategyKind::CacheFirst);
        assert_eq!("NetworkFirst".parse::<StrategyKind>().unwrap(), StrategyKind::NetworkFirst);
        assert_eq!(
            "stale_while_revalidate".parse::<StrategyKind>().unwrap(),
            StrategyKind::StaleWhileRevalidate
        );
        assert!(matches!(
            "sometimes".parse::<StrategyKind>(),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_for_origin() {
        let config = Config::for_origin("https://app.test").unwrap();
        assert_eq!(config.upstream_origin.as_str(), "https://app.test/");
        assert!(Config::for_origin("not a url").is_err());
        assert!(Config::for_origin("ftp://files.test").is_err());
    }

    #[test]
    fn test_offline_assets_always_in_manifest() {
        let manifest = with_offline_assets(
            vec!["/app.css".to_string()],
            "/offline.html",
            Some("/img/offline.svg"),
        );
        assert_eq!(manifest, vec!["/app.css", "/offline.html", "/img/offline.svg"]);

        let manifest = with_offline_assets(vec!["/offline.html".to_string()], "/offline.html", None);
        assert_eq!(manifest, vec!["/offline.html"]);
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("2".to_string()).unwrap(), "2");
        assert_eq!(parse_version(" 1.4.0-rc1 ".to_string()).unwrap(), "1.4.0-rc1");
        for bad in ["", "   ", "v 2", "../2", "2/3"] {
            assert!(
                matches!(parse_version(bad.to_string()), Err(GatewayError::Config(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" _t, _r ,,"), vec!["_t", "_r"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in [
            "UPSTREAM_ORIGIN",
            "SERVER_PORT",
            "CACHE_VERSION",
            "PRECACHE_MANIFEST",
            "OFFLINE_PAGE",
            "OFFLINE_IMAGE",
            "MAINTENANCE_INTERVAL",
            "API_STRATEGY",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.version, "1");
        assert_eq!(config.maintenance_interval, 300);
        assert_eq!(config.routes.api.kind, StrategyKind::NetworkFirst);
    }
}
