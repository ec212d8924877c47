//! Telemetry
//!
//! Fire-and-forget cache events. Emitting bumps atomic counters and hands
//! the event to a logger task through a bounded channel with `try_send`;
//! when the channel is full the event is dropped. The response path never
//! waits on telemetry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::RequestKey;
use crate::classify::RouteClass;
use crate::config::StrategyKind;
use crate::models::ResponseSource;

/// Events buffered between the gateway and the logger task
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Upstream round trips above this are logged as slow
pub const SLOW_REQUEST_MS: u64 = 3_000;

// == Cache Event ==
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit {
        key: RequestKey,
        class: RouteClass,
    },
    StaleHit {
        key: RequestKey,
        class: RouteClass,
    },
    Miss {
        key: RequestKey,
        class: RouteClass,
    },
    NetworkFetch {
        key: RequestKey,
        status: u16,
        elapsed_ms: u64,
    },
    NetworkFailure {
        key: RequestKey,
        reason: String,
    },
    FallbackServed {
        key: RequestKey,
        class: RouteClass,
        reason: &'static str,
    },
    Revalidated {
        key: RequestKey,
        success: bool,
    },
    WriteFailure {
        key: RequestKey,
        reason: String,
    },
    StrategyUsed {
        class: RouteClass,
        strategy: StrategyKind,
        source: ResponseSource,
        elapsed_ms: u64,
    },
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    network_fetches: AtomicU64,
    network_time_ms: AtomicU64,
    slow_fetches: AtomicU64,
    network_failures: AtomicU64,
    fallbacks: AtomicU64,
    revalidations: AtomicU64,
    revalidation_failures: AtomicU64,
    write_failures: AtomicU64,
    dropped_events: AtomicU64,
}

// == Telemetry Snapshot ==
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub network_fetches: u64,
    /// Fetches slower than `SLOW_REQUEST_MS`
    pub slow_fetches: u64,
    pub network_failures: u64,
    pub fallbacks: u64,
    pub revalidations: u64,
    pub revalidation_failures: u64,
    pub write_failures: u64,
    pub dropped_events: u64,
    /// Mean upstream round trip over successful fetches
    pub avg_network_ms: f64,
}

// == Telemetry ==
/// Cheap to clone; all clones share counters and the channel.
#[derive(Debug, Clone)]
pub struct Telemetry {
    counters: Arc<Counters>,
    events: Option<mpsc::Sender<CacheEvent>>,
}

impl Telemetry {
    /// Creates a telemetry handle and the receiving end for a logger task.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<CacheEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let telemetry = Self {
            counters: Arc::new(Counters::default()),
            events: Some(tx),
        };
        (telemetry, rx)
    }

    /// Counters only, no event stream.
    pub fn counters_only() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            events: None,
        }
    }

    // == Emit ==
    pub fn emit(&self, event: CacheEvent) {
        self.count(&event);

        if let Some(tx) = &self.events {
            if tx.try_send(event).is_err() {
                self.counters.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn count(&self, event: &CacheEvent) {
        let c = &self.counters;
        match event {
            CacheEvent::Hit { .. } => {
                c.hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::StaleHit { .. } => {
                c.stale_hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Miss { .. } => {
                c.misses.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::NetworkFetch { elapsed_ms, .. } => {
                c.network_fetches.fetch_add(1, Ordering::Relaxed);
                c.network_time_ms.fetch_add(*elapsed_ms, Ordering::Relaxed);
                if is_slow(*elapsed_ms) {
                    c.slow_fetches.fetch_add(1, Ordering::Relaxed);
                }
            }
            CacheEvent::NetworkFailure { .. } => {
                c.network_failures.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::FallbackServed { .. } => {
                c.fallbacks.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Revalidated { success, .. } => {
                c.revalidations.fetch_add(1, Ordering::Relaxed);
                if !success {
                    c.revalidation_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            CacheEvent::WriteFailure { .. } => {
                c.write_failures.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::StrategyUsed { .. } => {}
        }
    }

    // == Snapshot ==
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let c = &self.counters;
        let network_fetches = c.network_fetches.load(Ordering::Relaxed);
        let network_time = c.network_time_ms.load(Ordering::Relaxed);

        TelemetrySnapshot {
            hits: c.hits.load(Ordering::Relaxed),
            stale_hits: c.stale_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            network_fetches,
            slow_fetches: c.slow_fetches.load(Ordering::Relaxed),
            network_failures: c.network_failures.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            revalidations: c.revalidations.load(Ordering::Relaxed),
            revalidation_failures: c.revalidation_failures.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            dropped_events: c.dropped_events.load(Ordering::Relaxed),
            avg_network_ms: if network_fetches == 0 {
                0.0
            } else {
                network_time as f64 / network_fetches as f64
            },
        }
    }
}

// == Logger Task ==
/// Drains the event channel into `tracing`. Ends when every sender is dropped.
pub fn spawn_telemetry_logger(mut events: mpsc::Receiver<CacheEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Telemetry logger started");
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
        debug!("Telemetry channel closed");
    })
}

fn log_event(event: &CacheEvent) {
    match event {
        CacheEvent::Hit { key, class } => debug!(key = %key, class = %class, "Cache hit"),
        CacheEvent::StaleHit { key, class } => {
            debug!(key = %key, class = %class, "Stale cache hit")
        }
        CacheEvent::Miss { key, class } => debug!(key = %key, class = %class, "Cache miss"),
        CacheEvent::NetworkFetch {
            key,
            status,
            elapsed_ms,
        } => {
            if is_slow(*elapsed_ms) {
                warn!(key = %key, status, elapsed_ms, "Slow network request");
            } else {
                debug!(key = %key, status, elapsed_ms, "Network fetch");
            }
        }
        CacheEvent::NetworkFailure { key, reason } => {
            warn!(key = %key, reason = %reason, "Network fetch failed")
        }
        CacheEvent::FallbackServed { key, class, reason } => {
            info!(key = %key, class = %class, reason, "Served fallback response")
        }
        CacheEvent::Revalidated { key, success } => {
            debug!(key = %key, success, "Background revalidation finished")
        }
        CacheEvent::WriteFailure { key, reason } => {
            warn!(key = %key, reason = %reason, "Cache write failed")
        }
        CacheEvent::StrategyUsed {
            class,
            strategy,
            source,
            elapsed_ms,
        } => debug!(
            class = %class,
            strategy = strategy.as_str(),
            source = %source,
            elapsed_ms,
            "Request handled"
        ),
    }
}

fn is_slow(elapsed_ms: u64) -> bool {
    elapsed_ms > SLOW_REQUEST_MS
}
