//! Integration Tests for the Caching Gateway
//!
//! Drives the library API against a scripted origin that counts every fetch,
//! and the axum router end to end with `oneshot`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue};
use offline_cache::cache::{flush_mirror, CacheStore, DiskMirror, RequestKey, SharedStore};
use offline_cache::freshness::is_fresh_at;
use offline_cache::models::SOURCE_HEADER;
use offline_cache::upstream::{FetchError, Upstream, UpstreamRequest};
use offline_cache::{
    create_router, maintenance_channel, spawn_maintenance_worker, AppState, CacheRequest, Config,
    GatewayResponse, InterceptionGateway, LifecycleState, ResponseSource, Telemetry,
};
use serde_json::Value;
use tower::ServiceExt;

// == Scripted Origin ==

/// Upstream with canned responses per path, an offline switch, an optional
/// delay and a log of every fetched path.
#[derive(Default)]
struct ScriptedOrigin {
    routes: Mutex<HashMap<String, (StatusCode, &'static str, &'static str)>>,
    offline: AtomicBool,
    delay: Mutex<Duration>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedOrigin {
    fn serve(&self, path: &str, content_type: &'static str, body: &'static str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (StatusCode::OK, content_type, body));
    }

    fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn fetches(&self, path: &str) -> usize {
        self.fetched.lock().unwrap().iter().filter(|p| *p == path).count()
    }

    fn total_fetches(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

#[async_trait]
impl Upstream for ScriptedOrigin {
    async fn fetch(&self, request: UpstreamRequest) -> Result<GatewayResponse, FetchError> {
        self.fetched.lock().unwrap().push(request.url.path().to_string());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Connect("connection refused".to_string()));
        }

        let route = self.routes.lock().unwrap().get(request.url.path()).copied();
        let (status, content_type, body) =
            route.unwrap_or((StatusCode::NOT_FOUND, "text/plain", "not found"));
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Ok(GatewayResponse::new(status, headers, Bytes::from(body), ResponseSource::Network))
    }
}

// == Helper Functions ==

const OFFLINE_DOC: &str = "<html><body>You are offline</body></html>";

fn test_config(version: &str) -> Config {
    let mut config = Config::for_origin("https://app.test").unwrap();
    config.version = version.to_string();
    config.precache_manifest = vec![
        "/".to_string(),
        "/styles/app.css".to_string(),
        "/offline.html".to_string(),
    ];
    config
}

fn test_origin() -> Arc<ScriptedOrigin> {
    let origin = Arc::new(ScriptedOrigin::default());
    origin.serve("/", "text/html", "<html>home</html>");
    origin.serve("/styles/app.css", "text/css", "body{}");
    origin.serve("/offline.html", "text/html", OFFLINE_DOC);
    origin
}

async fn started_gateway(
    config: &Config,
    store: SharedStore,
    origin: Arc<ScriptedOrigin>,
) -> InterceptionGateway {
    let gateway = InterceptionGateway::new(config, store, origin, Telemetry::counters_only()).unwrap();
    gateway.lifecycle().start().await.unwrap();
    gateway
}

fn new_store() -> SharedStore {
    CacheStore::new(1000, 1024 * 1024).shared()
}

async fn get(gateway: &InterceptionGateway, url: &str) -> GatewayResponse {
    gateway.handle(CacheRequest::get(url).unwrap()).await
}

// == Never Cache ==

#[tokio::test]
async fn test_never_cache_never_touches_store() {
    let origin = test_origin();
    origin.serve("/index.html", "text/html", "<html>shell</html>");
    origin.serve("/bundle.js", "application/javascript", "run()");
    let store = new_store();
    let gateway = started_gateway(&test_config("1"), store.clone(), origin.clone()).await;
    let before = store.read().await.stats();

    for _ in 0..3 {
        get(&gateway, "https://app.test/index.html").await;
        get(&gateway, "https://app.test/bundle.js").await;
    }

    let after = store.read().await.stats();
    assert_eq!(after.reads(), before.reads());
    assert_eq!(after.writes, before.writes);
    assert_eq!(origin.fetches("/index.html"), 3);
    assert_eq!(origin.fetches("/bundle.js"), 3);
}

#[tokio::test]
async fn test_never_cache_offline_returns_typed_stub() {
    let origin = test_origin();
    let gateway = started_gateway(&test_config("1"), new_store(), origin.clone()).await;
    origin.go_offline();

    let resp = get(&gateway, "https://app.test/bundle.js").await;
    assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.content_type(), Some("application/javascript"));
    assert!(String::from_utf8_lossy(&resp.body).contains("console.warn"));
}

// == Cache First ==

#[tokio::test]
async fn test_cache_first_hit_skips_network() {
    let origin = test_origin();
    origin.serve("/img/logo.png", "image/png", "PNGDATA");
    let gateway = started_gateway(&test_config("1"), new_store(), origin.clone()).await;

    let first = get(&gateway, "https://app.test/img/logo.png").await;
    let second = get(&gateway, "https://app.test/img/logo.png").await;

    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.body, Bytes::from("PNGDATA"));
    assert_eq!(origin.fetches("/img/logo.png"), 1);
}

// == Stale While Revalidate ==

#[tokio::test]
async fn test_concurrent_revalidations_are_deduplicated() {
    let origin = test_origin();
    origin.serve("/lib/chart.css", "text/css", ".chart{}");
    let gateway = started_gateway(&test_config("1"), new_store(), origin.clone()).await;

    let primed = get(&gateway, "https://cdn.test/lib/chart.css").await;
    assert_eq!(primed.source, ResponseSource::Network);
    assert_eq!(origin.fetches("/lib/chart.css"), 1);

    origin.set_delay(Duration::from_millis(150));
    let mut requests = tokio::task::JoinSet::new();
    for _ in 0..5 {
        let gateway = gateway.clone();
        requests.spawn(async move { get(&gateway, "https://cdn.test/lib/chart.css").await });
    }
    while let Some(resp) = requests.join_next().await {
        let resp = resp.unwrap();
        assert_eq!(resp.body, Bytes::from(".chart{}"));
        assert_ne!(resp.source, ResponseSource::Network);
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(origin.fetches("/lib/chart.css"), 2);
}

// == Network First ==

#[tokio::test]
async fn test_api_replays_last_response_offline() {
    let origin = test_origin();
    origin.serve("/api/state", "application/json", r#"{"v":1}"#);
    let gateway = started_gateway(&test_config("1"), new_store(), origin.clone()).await;

    let online = get(&gateway, "https://app.test/api/state").await;
    assert_eq!(online.status, StatusCode::OK);

    origin.go_offline();
    let offline = get(&gateway, "https://app.test/api/state").await;
    assert_eq!(offline.status, StatusCode::OK);
    assert_eq!(offline.body, Bytes::from(r#"{"v":1}"#));
    assert_eq!(offline.headers.get(SOURCE_HEADER).unwrap(), "stale-cache");
}

#[tokio::test]
async fn test_api_offline_without_cache_is_503() {
    let origin = test_origin();
    let gateway = started_gateway(&test_config("1"), new_store(), origin.clone()).await;
    origin.go_offline();

    let resp = get(&gateway, "https://app.test/api/never-seen").await;
    assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.source, ResponseSource::Fallback);
}

// == Navigation ==

#[tokio::test]
async fn test_navigation_offline_serves_precached_document() {
    let origin = test_origin();
    let gateway = started_gateway(&test_config("1"), new_store(), origin.clone()).await;
    origin.go_offline();

    let resp = gateway
        .handle(CacheRequest::navigate("https://app.test/page").unwrap())
        .await;

    assert_eq!(resp.body, Bytes::from(OFFLINE_DOC));
    assert_eq!(resp.source, ResponseSource::Fallback);
}

#[tokio::test]
async fn test_navigation_offline_prefers_cached_page() {
    let origin = test_origin();
    origin.serve("/about", "text/html", "<html>about</html>");
    let gateway = started_gateway(&test_config("1"), new_store(), origin.clone()).await;

    gateway
        .handle(CacheRequest::navigate("https://app.test/about").unwrap())
        .await;
    origin.go_offline();
    let resp = gateway
        .handle(CacheRequest::navigate("https://app.test/about").unwrap())
        .await;

    assert_eq!(resp.body, Bytes::from("<html>about</html>"));
}

// == Freshness Boundary ==

#[test]
fn test_expiry_boundary_is_inclusive() {
    assert!(is_fresh_at(0, 1_000, 999));
    assert!(!is_fresh_at(0, 1_000, 1_000));
}

// == Lifecycle ==

#[tokio::test]
async fn test_maintenance_keeps_three_newest_entries() {
    let origin = test_origin();
    let mut config = test_config("1");
    config.routes.api.max_entries = 3;
    let store = new_store();
    let gateway = started_gateway(&config, store.clone(), origin.clone()).await;

    for i in 1..=5 {
        let path = format!("/api/item/{}", i);
        origin.serve(&path, "application/json", "{}");
        get(&gateway, &format!("https://app.test{}", path)).await;
    }
    assert_eq!(store.read().await.len("runtime-v1"), 5);

    let report = gateway.lifecycle().maintain().await.unwrap();
    assert_eq!(report.trimmed, 2);

    let keys = store.read().await.keys("runtime-v1").unwrap();
    let expected: Vec<RequestKey> = (3..=5)
        .map(|i| RequestKey::get(&format!("https://app.test/api/item/{}", i).parse().unwrap()))
        .collect();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn test_activate_twice_is_idempotent() {
    let store = new_store();
    let gateway = started_gateway(&test_config("1"), store.clone(), test_origin()).await;

    let once = store.read().await.partition_names();
    let report = gateway.lifecycle().activate().await.unwrap();
    let twice = store.read().await.partition_names();

    assert!(report.deleted.is_empty());
    assert_eq!(once, twice);
    assert_eq!(gateway.lifecycle().state(), LifecycleState::Active);
}

#[tokio::test]
async fn test_version_rollover_replaces_old_partitions() {
    let store = new_store();
    started_gateway(&test_config("1"), store.clone(), test_origin()).await;
    assert!(store.read().await.has_partition("static-v1"));

    let mut config = test_config("2");
    config.precache_manifest.push("/missing.css".to_string());
    let gateway = started_gateway(&config, store.clone(), test_origin()).await;

    let store = store.read().await;
    assert_eq!(store.partition_names(), vec!["runtime-v2", "static-v2"]);
    assert_eq!(store.len("static-v2"), 3);
    assert_eq!(gateway.lifecycle().version(), "2");
}

#[tokio::test]
async fn test_requests_before_activation_go_to_network() {
    let origin = test_origin();
    origin.serve("/img/a.png", "image/png", "A");
    let store = new_store();
    let gateway =
        InterceptionGateway::new(&test_config("1"), store.clone(), origin.clone(), Telemetry::counters_only())
            .unwrap();

    get(&gateway, "https://app.test/img/a.png").await;
    get(&gateway, "https://app.test/img/a.png").await;

    assert_eq!(origin.fetches("/img/a.png"), 2);
    assert!(store.read().await.is_empty());
}

// == Persistence ==

#[tokio::test]
async fn test_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let origin = test_origin();
    origin.serve("/api/profile", "application/json", r#"{"name":"ada"}"#);

    {
        let store = CacheStore::with_mirror(100, 1024 * 1024, DiskMirror::open(dir.path()).unwrap())
            .unwrap()
            .shared();
        let gateway = started_gateway(&test_config("1"), store.clone(), origin.clone()).await;
        get(&gateway, "https://app.test/api/profile").await;
        flush_mirror(&store).await;
    }

    let store = CacheStore::with_mirror(100, 1024 * 1024, DiskMirror::open(dir.path()).unwrap())
        .unwrap()
        .shared();
    let key = RequestKey::get(&"https://app.test/api/profile".parse().unwrap());
    let entry = store.read().await.match_entry("runtime-v1", &key).unwrap().unwrap();
    assert_eq!(entry.body, Bytes::from(r#"{"name":"ada"}"#));

    let offline_origin = test_origin();
    offline_origin.go_offline();
    let gateway = started_gateway(&test_config("1"), store, offline_origin.clone()).await;
    let resp = get(&gateway, "https://app.test/api/profile").await;
    assert_eq!(resp.body, Bytes::from(r#"{"name":"ada"}"#));
}

// == HTTP Router ==

async fn create_test_app(origin: Arc<ScriptedOrigin>) -> Router {
    let config = test_config("1");
    let store = new_store();
    let gateway = started_gateway(&config, store.clone(), origin).await;
    let (handle, jobs) = maintenance_channel();
    spawn_maintenance_worker(Arc::clone(gateway.lifecycle()), jobs);
    create_router(AppState::new(&config, gateway, store, handle))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_router_health() {
    let app = create_test_app(test_origin()).await;

    let response = app
        .oneshot(Request::builder().uri("/_sw/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["state"], "active");
}

#[tokio::test]
async fn test_router_stats_counts_hits() {
    let origin = test_origin();
    origin.serve("/img/x.png", "image/png", "X");
    let app = create_test_app(origin).await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/img/x.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(Request::builder().uri("/_sw/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["telemetry"]["hits"], 1);
    assert!(json["store"]["hits"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_router_navigation_header_routes_to_document() {
    let origin = test_origin();
    let app = create_test_app(origin.clone()).await;
    origin.go_offline();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/dashboard")
                .header("accept", "text/html,application/xhtml+xml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get(SOURCE_HEADER).unwrap(), "fallback");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], OFFLINE_DOC.as_bytes());
}

#[tokio::test]
async fn test_router_update_clears_runtime_partition() {
    let origin = test_origin();
    origin.serve("/api/a", "application/json", "1");
    let app = create_test_app(origin.clone()).await;

    app.clone()
        .oneshot(Request::builder().uri("/api/a").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/_sw/update")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/_sw/caches").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    let runtime = json["partitions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "runtime-v1")
        .unwrap();
    assert_eq!(runtime["entries"], 0);
    assert_eq!(origin.total_fetches(), 4);
}

#[tokio::test]
async fn test_router_prefetch_reports_already_cached() {
    let app = create_test_app(test_origin()).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/_sw/prefetch")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["report"]["already_cached"], 3);
    assert_eq!(json["report"]["cached"].as_array().unwrap().len(), 0);
}
