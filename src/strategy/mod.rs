//! Strategy Engine
//!
//! The caching algorithms. Each strategy is a function of the request, the
//! cache store, the class's `StrategyConfig` and the upstream, and is total:
//! it always yields a response. Cache writes are best effort; a failed write
//! is logged and the network response is still returned.
//!
//! Lookups search the runtime partition, then the static (precache)
//! partition. Writes always go to the runtime partition.

pub mod fallback;
mod revalidate;

pub use revalidate::{RevalidationGuard, RevalidationRegistry};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http::{header, HeaderValue};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{current_timestamp_ms, CacheEntry, RequestKey, SharedStore};
use crate::classify::{RequestClassifier, RouteClass};
use crate::config::{Config, StrategyConfig, StrategyKind};
use crate::error::Result;
use crate::freshness::is_fresh_at;
use crate::models::{CacheRequest, GatewayResponse, ResponseSource};
use crate::telemetry::{CacheEvent, Telemetry};
use crate::upstream::{fetch_with_timeout, FetchError, Upstream, UpstreamRequest};

// == Strategy Context ==
/// Everything a strategy needs to know about one request.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub request: CacheRequest,
    pub key: RequestKey,
    pub class: RouteClass,
    pub config: StrategyConfig,
}

impl StrategyContext {
    pub fn new(request: CacheRequest, key: RequestKey, class: RouteClass, config: StrategyConfig) -> Self {
        Self {
            request,
            key,
            class,
            config,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.config.kind
    }
}

// == Strategy Engine ==
#[derive(Clone)]
pub struct StrategyEngine {
    store: SharedStore,
    upstream: Arc<dyn Upstream>,
    revalidations: RevalidationRegistry,
    telemetry: Telemetry,
    runtime_partition: Arc<str>,
    static_partition: Arc<str>,
    offline_page: RequestKey,
    offline_image: Option<RequestKey>,
    /// `_r` cache-busting sequence
    bust_sequence: Arc<AtomicU64>,
}

impl StrategyEngine {
    pub fn new(
        config: &Config,
        classifier: &RequestClassifier,
        store: SharedStore,
        upstream: Arc<dyn Upstream>,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let offline_page = RequestKey::get(&classifier.resolve(&config.offline_page)?);
        let offline_image = match &config.offline_image {
            Some(path) => Some(RequestKey::get(&classifier.resolve(path)?)),
            None => None,
        };

        Ok(Self {
            store,
            upstream,
            revalidations: RevalidationRegistry::new(),
            telemetry,
            runtime_partition: Arc::from(config.runtime_partition()),
            static_partition: Arc::from(config.static_partition()),
            offline_page,
            offline_image,
            bust_sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn revalidations(&self) -> &RevalidationRegistry {
        &self.revalidations
    }

    // == Execute ==
    /// Runs the strategy configured for the request's class.
    pub async fn execute(&self, ctx: &StrategyContext) -> GatewayResponse {
        match ctx.kind() {
            StrategyKind::NeverCache => self.never_cache(ctx).await,
            StrategyKind::CacheFirst => self.cache_first(ctx).await,
            StrategyKind::NetworkFirst => self.network_first(ctx).await,
            StrategyKind::StaleWhileRevalidate => self.stale_while_revalidate(ctx).await,
            StrategyKind::Navigation => self.navigation(ctx).await,
            StrategyKind::NetworkOnly => self.network_only(ctx).await,
        }
    }

    // == Never Cache ==
    /// Network only, with no-cache directives and cache-busting parameters on
    /// the way out and no-cache headers on the way back. Never touches the store.
    async fn never_cache(&self, ctx: &StrategyContext) -> GatewayResponse {
        let sequence = self.bust_sequence.fetch_add(1, Ordering::Relaxed);
        let request =
            UpstreamRequest::from_request(&ctx.request).bust_cache(current_timestamp_ms(), sequence);

        match self.fetch(ctx, request).await {
            Ok(response) => with_no_cache_headers(response),
            Err(_) => self.serve_fallback(ctx, "never-cache fetch failed", || {
                fallback::error_stub(&ctx.request.url, ctx.request.destination)
            }),
        }
    }

    // == Network Only ==
    async fn network_only(&self, ctx: &StrategyContext) -> GatewayResponse {
        match self.fetch(ctx, UpstreamRequest::from_request(&ctx.request)).await {
            Ok(response) => response,
            Err(_) => self.serve_fallback(ctx, "network-only fetch failed", || {
                fallback::error_stub(&ctx.request.url, ctx.request.destination)
            }),
        }
    }

    // == Cache First ==
    async fn cache_first(&self, ctx: &StrategyContext) -> GatewayResponse {
        let cached = self.lookup(&ctx.key).await;

        match &cached {
            Some(entry) if self.is_fresh(ctx, entry) => {
                self.telemetry.emit(CacheEvent::Hit {
                    key: ctx.key.clone(),
                    class: ctx.class,
                });
                return entry.to_response(ResponseSource::Cache);
            }
            Some(_) => debug!(key = %ctx.key, "Cached entry expired, refetching"),
            None => self.telemetry.emit(CacheEvent::Miss {
                key: ctx.key.clone(),
                class: ctx.class,
            }),
        }

        match self.fetch(ctx, UpstreamRequest::from_request(&ctx.request)).await {
            Ok(response) => {
                self.persist(ctx, &response).await;
                response
            }
            Err(_) => match cached {
                Some(entry) => self.serve_stale(ctx, &entry),
                None => self.image_placeholder_or_unavailable(ctx).await,
            },
        }
    }

    // == Network First ==
    async fn network_first(&self, ctx: &StrategyContext) -> GatewayResponse {
        let error_response = match self.fetch(ctx, UpstreamRequest::from_request(&ctx.request)).await {
            Ok(response) if response.is_success() => {
                self.persist(ctx, &response).await;
                return response;
            }
            Ok(response) => Some(response),
            Err(_) => None,
        };

        // Network failed or answered with an error status: any cached copy wins
        if let Some(entry) = self.lookup(&ctx.key).await {
            return self.serve_stale(ctx, &entry);
        }
        self.telemetry.emit(CacheEvent::Miss {
            key: ctx.key.clone(),
            class: ctx.class,
        });

        match error_response {
            Some(response) => response,
            None => self.serve_fallback(ctx, "offline with no cached copy", fallback::offline_resource),
        }
    }

    // == Stale While Revalidate ==
    async fn stale_while_revalidate(&self, ctx: &StrategyContext) -> GatewayResponse {
        if let Some(entry) = self.lookup(&ctx.key).await {
            let fresh = self.is_fresh(ctx, &entry);
            self.spawn_revalidation(ctx);

            return if fresh {
                self.telemetry.emit(CacheEvent::Hit {
                    key: ctx.key.clone(),
                    class: ctx.class,
                });
                entry.to_response(ResponseSource::Cache)
            } else {
                self.serve_stale(ctx, &entry)
            };
        }

        self.telemetry.emit(CacheEvent::Miss {
            key: ctx.key.clone(),
            class: ctx.class,
        });
        match self.fetch(ctx, UpstreamRequest::from_request(&ctx.request)).await {
            Ok(response) => {
                self.persist(ctx, &response).await;
                response
            }
            Err(_) => self.serve_fallback(ctx, "offline with no cached copy", fallback::unavailable),
        }
    }

    /// Starts a background refresh of `ctx.key` unless one is already in flight.
    fn spawn_revalidation(&self, ctx: &StrategyContext) {
        let Some(guard) = self.revalidations.try_begin(&ctx.key) else {
            return;
        };

        let engine = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let request = UpstreamRequest::from_request(&ctx.request);
            let success = match engine.fetch(&ctx, request).await {
                Ok(response) if response.is_storable() => {
                    engine.persist(&ctx, &response).await;
                    true
                }
                Ok(response) => {
                    debug!(key = %ctx.key, status = %response.status, "Revalidation returned unstorable status");
                    false
                }
                Err(e) => {
                    debug!(key = %ctx.key, error = %e, "Revalidation fetch failed");
                    false
                }
            };

            debug!(key = %guard.key(), elapsed_ms = guard.elapsed_ms(), success, "Revalidation settled");
            engine.telemetry.emit(CacheEvent::Revalidated {
                key: guard.key().clone(),
                success,
            });
            drop(guard);
        });
    }

    // == Navigation ==
    /// Terminates in one of: network document, cached document, precached
    /// offline document, synthesized offline document.
    async fn navigation(&self, ctx: &StrategyContext) -> GatewayResponse {
        let error_response = match self.fetch(ctx, UpstreamRequest::from_request(&ctx.request)).await {
            Ok(response) if response.is_success() => {
                self.persist(ctx, &response).await;
                return response;
            }
            Ok(response) => Some(response),
            Err(_) => None,
        };

        if let Some(entry) = self.lookup(&ctx.key).await {
            return self.serve_stale(ctx, &entry);
        }
        self.telemetry.emit(CacheEvent::Miss {
            key: ctx.key.clone(),
            class: ctx.class,
        });

        match error_response {
            Some(response) => response,
            None => self.offline_document(ctx).await,
        }
    }

    async fn offline_document(&self, ctx: &StrategyContext) -> GatewayResponse {
        match self.lookup(&self.offline_page).await {
            Some(entry) => {
                self.telemetry.emit(CacheEvent::FallbackServed {
                    key: ctx.key.clone(),
                    class: ctx.class,
                    reason: "precached offline document",
                });
                entry.to_response(ResponseSource::Fallback)
            }
            None => self.serve_fallback(ctx, "offline document not precached", fallback::offline_document),
        }
    }

    async fn image_placeholder_or_unavailable(&self, ctx: &StrategyContext) -> GatewayResponse {
        if ctx.class == RouteClass::Image {
            if let Some(placeholder_key) = &self.offline_image {
                if let Some(entry) = self.lookup(placeholder_key).await {
                    self.telemetry.emit(CacheEvent::FallbackServed {
                        key: ctx.key.clone(),
                        class: ctx.class,
                        reason: "offline placeholder image",
                    });
                    return entry.to_response(ResponseSource::Fallback);
                }
            }
        }
        self.serve_fallback(ctx, "offline with no cached copy", fallback::unavailable)
    }

    // == Shared Steps ==
    fn is_fresh(&self, ctx: &StrategyContext, entry: &CacheEntry) -> bool {
        is_fresh_at(entry.cached_at, ctx.config.max_age_ms(), current_timestamp_ms())
    }

    /// Finds `key` in the runtime partition, then the static partition.
    async fn lookup(&self, key: &RequestKey) -> Option<CacheEntry> {
        let store = self.store.read().await;
        store.match_any(&[&*self.runtime_partition, &*self.static_partition], key)
    }

    /// Stores a complete `200 OK` response in the runtime partition.
    /// Answers to Range requests are skipped. Failures are logged and
    /// swallowed.
    async fn persist(&self, ctx: &StrategyContext, response: &GatewayResponse) {
        if !response.is_storable() || ctx.request.is_range() || !ctx.class.is_cacheable() {
            return;
        }

        let entry = CacheEntry::from_response(ctx.key.clone(), response, ctx.class);
        let result = self.store.write().await.put(&self.runtime_partition, entry);
        if let Err(e) = result {
            warn!(key = %ctx.key, error = %e, "Failed to cache response");
            self.telemetry.emit(CacheEvent::WriteFailure {
                key: ctx.key.clone(),
                reason: e.to_string(),
            });
        }
    }

    /// One upstream fetch bounded by the class timeout.
    async fn fetch(&self, ctx: &StrategyContext, request: UpstreamRequest) -> std::result::Result<GatewayResponse, FetchError> {
        let started = Instant::now();
        let result = fetch_with_timeout(self.upstream.as_ref(), request, ctx.config.timeout).await;

        match &result {
            Ok(response) => self.telemetry.emit(CacheEvent::NetworkFetch {
                key: ctx.key.clone(),
                status: response.status.as_u16(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            Err(e) => self.telemetry.emit(CacheEvent::NetworkFailure {
                key: ctx.key.clone(),
                reason: e.to_string(),
            }),
        }
        result
    }

    fn serve_stale(&self, ctx: &StrategyContext, entry: &CacheEntry) -> GatewayResponse {
        self.telemetry.emit(CacheEvent::StaleHit {
            key: ctx.key.clone(),
            class: ctx.class,
        });
        entry.to_response(ResponseSource::StaleCache)
    }

    fn serve_fallback(
        &self,
        ctx: &StrategyContext,
        reason: &'static str,
        build: impl FnOnce() -> GatewayResponse,
    ) -> GatewayResponse {
        self.telemetry.emit(CacheEvent::FallbackServed {
            key: ctx.key.clone(),
            class: ctx.class,
            reason,
        });
        build()
    }
}

/// Forces clients and intermediaries to refetch next time.
pub fn with_no_cache_headers(mut response: GatewayResponse) -> GatewayResponse {
    response.headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
        .headers
        .insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
        .headers
        .insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}
