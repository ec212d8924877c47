//! Cache Lifecycle Manager
//!
//! Owns the partition set of the current cache version:
//! - **Install** opens the current partitions and precaches the manifest.
//! - **Activate** deletes every partition of another version.
//! - **Maintenance** expires and trims the runtime partition.
//! - **Update check** refetches the main page and refreshes its runtime copy.
//!
//! States: `Uninitialized -> Installing -> Installed -> Active`, then
//! `Active -> Maintaining -> Active` for each maintenance pass. A failed
//! install falls back from `Installing` to `Uninitialized`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use http::Method;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{current_timestamp_ms, CacheEntry, PartitionName, RequestKey, SharedStore};
use crate::classify::{RequestClassifier, RouteClass};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::freshness::FreshnessPolicy;
use crate::models::{CacheRequest, Destination};
use crate::upstream::{fetch_with_timeout, Upstream, UpstreamRequest};

// == Lifecycle State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Uninitialized,
    Installing,
    Installed,
    Active,
    Maintaining,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Active => "active",
            LifecycleState::Maintaining => "maintaining",
        }
    }

    /// Allowed edges of the state machine; nothing may be skipped.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Installing)
                | (Installing, Installed)
                | (Installing, Uninitialized)
                | (Installed, Active)
                | (Active, Maintaining)
                | (Maintaining, Active)
        )
    }

    /// Whether the cache partitions are usable by strategies.
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::Maintaining)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Reports ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrecacheFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub partition: String,
    pub cached: Vec<String>,
    pub failed: Vec<PrecacheFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub partition: String,
    pub expired: usize,
    pub trimmed: usize,
    pub remaining: usize,
    /// True when the pass did not run (another pass in progress, or not active)
    pub skipped: bool,
    pub duration_ms: u64,
}

impl MaintenanceReport {
    fn skipped(partition: &str) -> Self {
        Self {
            partition: partition.to_string(),
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCheckReport {
    pub url: String,
    pub status: u16,
    /// True when the cached copy differed and was replaced
    pub updated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    pub already_cached: usize,
    pub cached: Vec<String>,
    pub failed: Vec<PrecacheFailure>,
}

// == Cache Lifecycle Manager ==
pub struct CacheLifecycleManager {
    version: String,
    manifest: Vec<String>,
    static_partition: String,
    runtime_partition: String,
    classifier: RequestClassifier,
    freshness: FreshnessPolicy,
    store: SharedStore,
    upstream: Arc<dyn Upstream>,
    precache_timeout: std::time::Duration,
    update_check_timeout: std::time::Duration,
    state: watch::Sender<LifecycleState>,
    /// Held for the duration of a maintenance pass
    maintenance: Mutex<()>,
}

impl CacheLifecycleManager {
    pub fn new(
        config: &Config,
        classifier: RequestClassifier,
        store: SharedStore,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Uninitialized);
        Self {
            version: config.version.clone(),
            manifest: config.precache_manifest.clone(),
            static_partition: config.static_partition(),
            runtime_partition: config.runtime_partition(),
            classifier,
            freshness: FreshnessPolicy::from_config(config),
            store,
            upstream,
            precache_timeout: config.routes.static_asset.timeout,
            update_check_timeout: config.routes.navigation.timeout,
            state,
            maintenance: Mutex::new(()),
        }
    }

    // == State ==
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn static_partition(&self) -> &str {
        &self.static_partition
    }

    pub fn runtime_partition(&self) -> &str {
        &self.runtime_partition
    }

    fn transition(&self, to: LifecycleState) -> Result<()> {
        let mut from = LifecycleState::Uninitialized;
        let moved = self.state.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(to) {
                *state = to;
                true
            } else {
                false
            }
        });

        if moved {
            debug!(from = %from, to = %to, "Lifecycle transition");
            Ok(())
        } else {
            Err(GatewayError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    // == Start ==
    /// Install followed by Activate.
    pub async fn start(&self) -> Result<(InstallReport, ActivateReport)> {
        let installed = self.install().await?;
        let activated = self.activate().await?;
        Ok((installed, activated))
    }

    // == Install ==
    /// Opens the current partitions and precaches the manifest. Assets that
    /// fail to fetch are logged and skipped. If the partitions cannot be
    /// opened the state returns to `Uninitialized` and install may be retried.
    pub async fn install(&self) -> Result<InstallReport> {
        self.transition(LifecycleState::Installing)?;
        info!(version = %self.version, assets = self.manifest.len(), "Installing cache");

        let opened = {
            let mut store = self.store.write().await;
            store
                .open(&self.static_partition)
                .and_then(|_| store.open(&self.runtime_partition))
        };
        if let Err(e) = opened {
            warn!(version = %self.version, error = %e, "Install failed");
            self.transition(LifecycleState::Uninitialized)?;
            return Err(e);
        }

        let (cached, failed) = self.precache(self.manifest.clone()).await;
        info!(
            partition = %self.static_partition,
            cached = cached.len(),
            failed = failed.len(),
            "Precache complete"
        );

        self.transition(LifecycleState::Installed)?;
        Ok(InstallReport {
            partition: self.static_partition.clone(),
            cached,
            failed,
        })
    }

    /// Fetches `paths` concurrently into the static partition.
    async fn precache(&self, paths: Vec<String>) -> (Vec<String>, Vec<PrecacheFailure>) {
        let mut fetches = JoinSet::new();
        let mut failed = Vec::new();

        for path in paths {
            let url = match self.classifier.resolve(&path) {
                Ok(url) => url,
                Err(e) => {
                    failed.push(self.precache_failure(&path, e.to_string()));
                    continue;
                }
            };
            let upstream = Arc::clone(&self.upstream);
            let timeout = self.precache_timeout;
            fetches.spawn(async move {
                let result =
                    fetch_with_timeout(upstream.as_ref(), UpstreamRequest::get(url.clone()), timeout).await;
                (path, url, result)
            });
        }

        let mut cached = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            let (path, url, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Precache task failed");
                    continue;
                }
            };

            let response = match result {
                Ok(response) if response.is_storable() => response,
                Ok(response) => {
                    failed.push(self.precache_failure(&path, format!("status {}", response.status)));
                    continue;
                }
                Err(e) => {
                    failed.push(self.precache_failure(&path, e.to_string()));
                    continue;
                }
            };

            let entry = CacheEntry::from_response(RequestKey::get(&url), &response, self.precache_class(&url));
            match self.store.write().await.put(&self.static_partition, entry) {
                Ok(()) => cached.push(path),
                Err(e) => failed.push(self.precache_failure(&path, e.to_string())),
            }
        }

        cached.sort();
        (cached, failed)
    }

    fn precache_failure(&self, path: &str, reason: String) -> PrecacheFailure {
        let err = GatewayError::ManifestFetchFailed {
            path: path.to_string(),
            reason: reason.clone(),
        };
        warn!(error = %err, "Skipping precache asset");
        PrecacheFailure {
            path: path.to_string(),
            reason,
        }
    }

    fn precache_class(&self, url: &Url) -> RouteClass {
        let request = CacheRequest::new(Method::GET, url.clone(), Destination::Empty);
        match self.classifier.classify(&request) {
            class if class.is_cacheable() => class,
            _ => RouteClass::StaticAsset,
        }
    }

    // == Activate ==
    /// Deletes every partition whose version is not the current one. Runs
    /// under the store write lock, so a write that targets a deleted
    /// partition either completed before or fails after. Safe to repeat.
    pub async fn activate(&self) -> Result<ActivateReport> {
        match self.state() {
            LifecycleState::Installed | LifecycleState::Active | LifecycleState::Maintaining => {}
            other => {
                return Err(GatewayError::InvalidTransition {
                    from: other.to_string(),
                    to: LifecycleState::Active.to_string(),
                })
            }
        }

        let mut report = ActivateReport::default();
        {
            let mut store = self.store.write().await;
            for name in store.partition_names() {
                let current = PartitionName::parse(&name)
                    .map(|p| p.version() == self.version)
                    .unwrap_or(false);
                if current {
                    report.kept.push(name);
                } else {
                    store.delete_partition(&name)?;
                    info!(partition = %name, "Deleted stale cache partition");
                    report.deleted.push(name);
                }
            }
        }

        if self.state() == LifecycleState::Installed {
            self.transition(LifecycleState::Active)?;
            info!(version = %self.version, "Cache active");
        }
        Ok(report)
    }

    // == Maintenance ==
    /// Expires and trims the runtime partition. A pass requested while
    /// another is running, or before activation, is skipped.
    pub async fn maintain(&self) -> Result<MaintenanceReport> {
        let Ok(_running) = self.maintenance.try_lock() else {
            debug!("Maintenance already running, skipping");
            return Ok(MaintenanceReport::skipped(&self.runtime_partition));
        };
        if self.transition(LifecycleState::Maintaining).is_err() {
            debug!(state = %self.state(), "Cache not active, skipping maintenance");
            return Ok(MaintenanceReport::skipped(&self.runtime_partition));
        }

        let result = self.run_maintenance().await;
        self.transition(LifecycleState::Active)?;
        result
    }

    async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let started = Instant::now();
        let mut store = self.store.write().await;

        let entries = store.entry_infos(&self.runtime_partition)?;
        let plan = self.freshness.plan_maintenance(&entries, current_timestamp_ms());
        for key in plan.keys() {
            store.delete(&self.runtime_partition, key)?;
        }

        let report = MaintenanceReport {
            partition: self.runtime_partition.clone(),
            expired: plan.expired.len(),
            trimmed: plan.overflow.len(),
            remaining: store.len(&self.runtime_partition),
            skipped: false,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if plan.is_empty() {
            debug!(partition = %report.partition, "Maintenance: nothing to evict");
        } else {
            info!(
                partition = %report.partition,
                expired = report.expired,
                trimmed = report.trimmed,
                remaining = report.remaining,
                "Maintenance evicted entries"
            );
        }
        Ok(report)
    }

    // == Administrative Operations ==
    /// Deletes a partition; a current partition is reopened empty.
    pub async fn clear_partition(&self, name: &str) -> Result<bool> {
        crate::cache::validate_partition_name(name)?;
        let mut store = self.store.write().await;
        let existed = store.delete_partition(name)?;
        if name == self.static_partition || name == self.runtime_partition {
            store.open(name)?;
        }
        info!(partition = name, existed, "Cleared cache partition");
        Ok(existed)
    }

    /// Drops everything cached at request time.
    pub async fn force_update(&self) -> Result<()> {
        let runtime = self.runtime_partition.clone();
        self.clear_partition(&runtime).await?;
        Ok(())
    }

    // == Update Check ==
    /// Refetches the main page past every HTTP cache. When the runtime
    /// partition holds a copy whose body differs, the copy is replaced.
    pub async fn check_for_updates(&self) -> Result<UpdateCheckReport> {
        if !self.is_ready() {
            return Err(GatewayError::CacheUnavailable(format!(
                "cache is {}, not active",
                self.state()
            )));
        }

        let url = self.classifier.resolve("/")?;
        let key = RequestKey::get(&url);
        let request = UpstreamRequest::get(url.clone()).bust_cache(current_timestamp_ms(), 0);
        let response =
            fetch_with_timeout(self.upstream.as_ref(), request, self.update_check_timeout).await?;

        let mut report = UpdateCheckReport {
            url: url.to_string(),
            status: response.status.as_u16(),
            updated: false,
        };
        if !response.is_storable() {
            debug!(url = %report.url, status = report.status, "Update check got no usable page");
            return Ok(report);
        }

        let mut store = self.store.write().await;
        match store.match_entry(&self.runtime_partition, &key)? {
            Some(cached) if cached.body != response.body => {
                let entry = CacheEntry::from_response(key, &response, cached.route_class);
                store.put(&self.runtime_partition, entry)?;
                info!(url = %report.url, "Page update detected, refreshed cached copy");
                report.updated = true;
            }
            Some(_) => debug!(url = %report.url, "Main page unchanged"),
            None => debug!(url = %report.url, "Main page not cached, nothing to refresh"),
        }
        Ok(report)
    }

    /// Fetches manifest assets missing from the static partition.
    pub async fn prefetch(&self) -> Result<PrefetchReport> {
        if !self.is_ready() {
            return Err(GatewayError::CacheUnavailable(format!(
                "cache is {}, not active",
                self.state()
            )));
        }

        let present: HashSet<RequestKey> = self
            .store
            .read()
            .await
            .keys(&self.static_partition)?
            .into_iter()
            .collect();

        let mut missing = Vec::new();
        for path in &self.manifest {
            match self.classifier.resolve(path) {
                Ok(url) if present.contains(&RequestKey::get(&url)) => {}
                _ => missing.push(path.clone()),
            }
        }

        let already_cached = self.manifest.len() - missing.len();
        let (cached, failed) = self.precache(missing).await;
        Ok(PrefetchReport {
            already_cached,
            cached,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::models::{GatewayResponse, ResponseSource};
    use crate::upstream::mock::MockUpstream;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    fn config(version: &str) -> Config {
        let mut config = Config::for_origin("https://app.test").unwrap();
        config.version = version.to_string();
        config.precache_manifest = vec!["/offline.html".to_string(), "/app.css".to_string()];
        config
    }

    fn manager(config: &Config, store: SharedStore, upstream: Arc<MockUpstream>) -> CacheLifecycleManager {
        let classifier = RequestClassifier::new(config).unwrap();
        CacheLifecycleManager::new(config, classifier, store, upstream)
    }

    fn upstream() -> Arc<MockUpstream> {
        let upstream = Arc::new(MockUpstream::new());
        upstream.ok("/offline.html", "text/html", "<h1>offline</h1>");
        upstream.ok("/app.css", "text/css", "body{}");
        upstream
    }

    fn entry(key: &str, class: RouteClass, at: u64) -> CacheEntry {
        let resp = GatewayResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from("x"), ResponseSource::Network);
        CacheEntry::from_response_at(RequestKey::from(key), &resp, class, at)
    }

    #[test]
    fn test_transitions() {
        use LifecycleState::*;
        assert!(Uninitialized.can_transition_to(Installing));
        assert!(Active.can_transition_to(Maintaining));
        assert!(Maintaining.can_transition_to(Active));
        assert!(!Uninitialized.can_transition_to(Active));
        assert!(!Installing.can_transition_to(Active));
        assert!(!Installed.can_transition_to(Maintaining));
        assert!(Installing.can_transition_to(Uninitialized));
        assert!(!Active.can_transition_to(Uninitialized));
    }

    #[tokio::test]
    async fn test_install_precaches_manifest() {
        let store = CacheStore::new(100, 1024).shared();
        let config = config("1");
        let manager = manager(&config, store.clone(), upstream());

        let report = manager.install().await.unwrap();
        assert_eq!(report.cached, vec!["/app.css", "/offline.html"]);
        assert!(report.failed.is_empty());
        assert_eq!(manager.state(), LifecycleState::Installed);
        assert_eq!(store.read().await.len("static-v1"), 2);
        assert!(store.read().await.has_partition("runtime-v1"));
    }

    #[tokio::test]
    async fn test_subscribers_see_activation() {
        let store = CacheStore::new(100, 1024).shared();
        let manager = manager(&config("1"), store, upstream());
        let mut states = manager.subscribe();
        assert_eq!(*states.borrow_and_update(), LifecycleState::Uninitialized);

        manager.start().await.unwrap();
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), LifecycleState::Active);
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn test_install_failure_resets_state() {
        let store = CacheStore::new(100, 1024).shared();
        let mut config = config("1");
        config.version = "bad version".to_string();
        let manager = manager(&config, store.clone(), upstream());

        assert!(matches!(
            manager.start().await,
            Err(GatewayError::InvalidRequest(_))
        ));
        assert_eq!(manager.state(), LifecycleState::Uninitialized);
        assert!(!manager.is_ready());
        assert!(store.read().await.partition_names().is_empty());

        // Not stuck in Installing: a retry runs install again
        assert!(matches!(
            manager.install().await,
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_content_is_not_precached() {
        let store = CacheStore::new(100, 1024).shared();
        let upstream = upstream();
        upstream.route("/app.css", StatusCode::PARTIAL_CONTENT, "text/css", "bo");
        let manager = manager(&config("1"), store.clone(), upstream);

        let report = manager.install().await.unwrap();
        assert_eq!(report.cached, vec!["/offline.html"]);
        assert_eq!(report.failed[0].path, "/app.css");
        assert_eq!(store.read().await.len("static-v1"), 1);
    }

    #[tokio::test]
    async fn test_update_check_replaces_changed_page() {
        let store = CacheStore::new(100, 1024).shared();
        let upstream = upstream();
        upstream.ok("/", "text/html", "<p>v2</p>");
        let manager = manager(&config("1"), store.clone(), upstream.clone());
        manager.start().await.unwrap();

        let home = RequestKey::get(&"https://app.test/".parse().unwrap());
        let old = GatewayResponse::synthesized(StatusCode::OK, "text/html", "<p>v1</p>");
        store
            .write()
            .await
            .put("runtime-v1", CacheEntry::from_response_at(home.clone(), &old, RouteClass::Navigation, 1))
            .unwrap();

        let report = manager.check_for_updates().await.unwrap();
        assert!(report.updated);
        assert_eq!(report.status, 200);

        let sent = upstream.last_request().unwrap();
        assert_eq!(sent.url.path(), "/");
        assert_eq!(sent.headers.get(http::header::PRAGMA).unwrap(), "no-cache");

        let cached = store.read().await.match_entry("runtime-v1", &home).unwrap().unwrap();
        assert_eq!(cached.body, Bytes::from("<p>v2</p>"));
        assert_eq!(cached.route_class, RouteClass::Navigation);

        // Same body again: nothing to replace
        assert!(!manager.check_for_updates().await.unwrap().updated);
    }

    #[tokio::test]
    async fn test_update_check_without_cached_page() {
        let store = CacheStore::new(100, 1024).shared();
        let upstream = upstream();
        upstream.ok("/", "text/html", "<p>v2</p>");
        let manager = manager(&config("1"), store.clone(), upstream);

        assert!(matches!(
            manager.check_for_updates().await,
            Err(GatewayError::CacheUnavailable(_))
        ));

        manager.start().await.unwrap();
        let report = manager.check_for_updates().await.unwrap();
        assert!(!report.updated);
        assert_eq!(store.read().await.len("runtime-v1"), 0);
    }

    #[tokio::test]
    async fn test_partial_precache_is_not_fatal() {
        let store = CacheStore::new(100, 1024).shared();
        let mut config = config("1");
        config.precache_manifest.push("/missing.png".to_string());
        let manager = manager(&config, store.clone(), upstream());

        let report = manager.install().await.unwrap();
        assert_eq!(report.cached.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "/missing.png");
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let store = CacheStore::new(100, 1024).shared();
        let manager = manager(&config("1"), store, upstream());
        assert!(matches!(
            manager.activate().await,
            Err(GatewayError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_version_rollover() {
        let mut store = CacheStore::new(100, 1024);
        store.open("static-v1").unwrap();
        store.open("runtime-v1").unwrap();
        let store = store.shared();

        let manager = manager(&config("2"), store.clone(), upstream());
        let (installed, activated) = manager.start().await.unwrap();

        assert_eq!(installed.partition, "static-v2");
        assert_eq!(activated.deleted, vec!["runtime-v1", "static-v1"]);
        assert_eq!(store.read().await.partition_names(), vec!["runtime-v2", "static-v2"]);
        assert_eq!(store.read().await.len("static-v2"), 2);
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let mut store = CacheStore::new(100, 1024);
        store.open("static-v1").unwrap();
        let store = store.shared();
        let manager = manager(&config("2"), store.clone(), upstream());

        manager.start().await.unwrap();
        let once = store.read().await.partition_names();
        let again = manager.activate().await.unwrap();
        assert!(again.deleted.is_empty());
        assert_eq!(store.read().await.partition_names(), once);
    }

    #[tokio::test]
    async fn test_maintenance_trims_runtime() {
        let store = CacheStore::new(100, 1024).shared();
        let mut config = config("1");
        config.routes.api.max_entries = 3;
        let manager = manager(&config, store.clone(), upstream());
        manager.start().await.unwrap();

        let now = current_timestamp_ms();
        {
            let mut s = store.write().await;
            for i in 1..=5 {
                s.put("runtime-v1", entry(&format!("k{}", i), RouteClass::Api, now)).unwrap();
            }
            s.put("runtime-v1", entry("old", RouteClass::Api, 0)).unwrap();
        }

        let report = manager.maintain().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.trimmed, 2);
        assert_eq!(report.remaining, 3);
        assert_eq!(manager.state(), LifecycleState::Active);
        assert_eq!(
            store.read().await.keys("runtime-v1").unwrap(),
            vec![RequestKey::from("k3"), RequestKey::from("k4"), RequestKey::from("k5")]
        );
        // Static partition is never trimmed
        assert_eq!(store.read().await.len("static-v1"), 2);
    }

    #[tokio::test]
    async fn test_maintenance_skipped_when_not_active() {
        let store = CacheStore::new(100, 1024).shared();
        let manager = manager(&config("1"), store, upstream());
        let report = manager.maintain().await.unwrap();
        assert!(report.skipped);
        assert_eq!(manager.state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_overlapping_maintenance_is_skipped() {
        let store = CacheStore::new(100, 1024).shared();
        let manager = manager(&config("1"), store, upstream());
        manager.start().await.unwrap();

        let _held = manager.maintenance.lock().await;
        assert!(manager.maintain().await.unwrap().skipped);
    }

    #[tokio::test]
    async fn test_clear_and_force_update() {
        let store = CacheStore::new(100, 1024).shared();
        let manager = manager(&config("1"), store.clone(), upstream());
        manager.start().await.unwrap();
        store
            .write()
            .await
            .put("runtime-v1", entry("k", RouteClass::Api, 1))
            .unwrap();

        manager.force_update().await.unwrap();
        assert!(store.read().await.has_partition("runtime-v1"));
        assert_eq!(store.read().await.len("runtime-v1"), 0);

        assert!(!manager.clear_partition("other-v9").await.unwrap());
        assert!(manager.clear_partition("../x").await.is_err());
    }

    #[tokio::test]
    async fn test_prefetch_fetches_only_missing() {
        let store = CacheStore::new(100, 1024).shared();
        let upstream = upstream();
        upstream.set_offline(true);
        let manager = manager(&config("1"), store.clone(), upstream.clone());
        let (installed, _) = manager.start().await.unwrap();
        assert_eq!(installed.failed.len(), 2);

        upstream.set_offline(false);
        let report = manager.prefetch().await.unwrap();
        assert_eq!(report.already_cached, 0);
        assert_eq!(report.cached.len(), 2);

        let report = manager.prefetch().await.unwrap();
        assert_eq!(report.already_cached, 2);
        assert!(report.cached.is_empty());
    }
}
