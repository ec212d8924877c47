//! API Handlers
//!
//! The proxy fallback that feeds every client request through the
//! interception gateway, and the `/_sw/` administrative endpoints.

use axum::{
    body::to_bytes,
    extract::{Path, Request, State},
    http::Uri,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, info};
use url::Url;

use crate::cache::{validate_partition_name, SharedStore};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::gateway::InterceptionGateway;
use crate::models::{
    CacheRequest, CachesResponse, ClearCacheResponse, Destination, HealthResponse,
    MaintenanceResponse, PartitionStatus, PrefetchResponse, StatsResponse, UpdateCheckResponse,
    UpdateResponse,
};
use crate::tasks::{MaintenanceHandle, MaintenanceTrigger};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: InterceptionGateway,
    /// Same store the gateway writes to, read by the admin endpoints
    pub store: SharedStore,
    pub maintenance: MaintenanceHandle,
    /// Origin that origin-form request targets are resolved against
    pub upstream_origin: Url,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        config: &Config,
        gateway: InterceptionGateway,
        store: SharedStore,
        maintenance: MaintenanceHandle,
    ) -> Self {
        Self {
            gateway,
            store,
            maintenance,
            upstream_origin: config.upstream_origin.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

// == Proxy ==
/// Fallback handler: every request that is not an admin route.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    match to_cache_request(&state, request).await {
        Ok(request) => state.gateway.handle(request).await.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn to_cache_request(state: &AppState, request: Request) -> Result<CacheRequest> {
    let (parts, body) = request.into_parts();
    let url = target_url(&state.upstream_origin, &parts.uri)?;
    let body = to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| GatewayError::InvalidRequest(format!("unreadable request body: {}", e)))?;

    let destination = Destination::infer(&parts.method, &parts.headers);
    debug!(method = %parts.method, url = %url, ?destination, "Intercepted request");

    Ok(CacheRequest::new(parts.method, url, destination)
        .with_headers(parts.headers)
        .with_body(body))
}

/// Resolves the request target: absolute-form URIs are kept, origin-form
/// paths are joined onto the upstream origin.
fn target_url(origin: &Url, uri: &Uri) -> Result<Url> {
    let parsed = if uri.scheme().is_some() {
        Url::parse(&uri.to_string())
    } else {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        origin.join(path)
    };
    parsed.map_err(|e| GatewayError::InvalidRequest(format!("invalid request target '{}': {}", uri, e)))
}

// == Admin ==
/// Handler for GET /_sw/health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let lifecycle = state.gateway.lifecycle();
    Json(HealthResponse::new(lifecycle.state(), lifecycle.version()))
}

/// Handler for GET /_sw/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let store = state.store.read().await.stats();
    Json(StatsResponse::new(store, state.gateway.telemetry().snapshot()))
}

/// Handler for GET /_sw/caches
pub async fn caches_handler(State(state): State<AppState>) -> Result<Json<CachesResponse>> {
    let store = state.store.read().await;
    let mut partitions = Vec::new();
    for name in store.partition_names() {
        let keys = store.keys(&name)?;
        partitions.push(PartitionStatus::new(name, &keys));
    }

    Ok(Json(CachesResponse {
        version: state.gateway.lifecycle().version().to_string(),
        partitions,
    }))
}

/// Handler for DELETE /_sw/caches/:name
pub async fn clear_cache_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ClearCacheResponse>> {
    validate_partition_name(&name)?;
    let existed = state.gateway.lifecycle().clear_partition(&name).await?;
    Ok(Json(ClearCacheResponse::new(name, existed)))
}

/// Handler for POST /_sw/update
pub async fn update_handler(State(state): State<AppState>) -> Result<Json<UpdateResponse>> {
    let lifecycle = state.gateway.lifecycle();
    lifecycle.force_update().await?;
    info!("Forced cache update");
    Ok(Json(UpdateResponse::new(lifecycle.runtime_partition())))
}

/// Handler for POST /_sw/update-check
pub async fn update_check_handler(
    State(state): State<AppState>,
) -> Result<Json<UpdateCheckResponse>> {
    let report = state.gateway.lifecycle().check_for_updates().await?;
    Ok(Json(UpdateCheckResponse::new(report)))
}

/// Handler for POST /_sw/maintenance
pub async fn maintenance_handler(
    State(state): State<AppState>,
) -> Result<Json<MaintenanceResponse>> {
    let report = state.maintenance.request(MaintenanceTrigger::Admin).await?;
    Ok(Json(MaintenanceResponse::new(report)))
}

/// Handler for POST /_sw/prefetch
pub async fn prefetch_handler(State(state): State<AppState>) -> Result<Json<PrefetchResponse>> {
    let report = state.gateway.lifecycle().prefetch().await?;
    Ok(Json(PrefetchResponse::new(report)))
}
