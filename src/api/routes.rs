//! API Routes
//!
//! Configures the Axum router: administrative endpoints under `/_sw/` and
//! the gateway as fallback for everything else.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    caches_handler, clear_cache_handler, health_handler, maintenance_handler, prefetch_handler,
    proxy_handler, stats_handler, update_check_handler, update_handler, AppState,
};

/// Creates the main router.
///
/// # Endpoints
/// - `GET /_sw/health` - Lifecycle state and cache version
/// - `GET /_sw/stats` - Store and telemetry counters
/// - `GET /_sw/caches` - Partitions with entry counts
/// - `DELETE /_sw/caches/:name` - Clear one partition
/// - `POST /_sw/update` - Reset the runtime partition
/// - `POST /_sw/update-check` - Refresh the cached main page if it changed
/// - `POST /_sw/maintenance` - Run a maintenance pass
/// - `POST /_sw/prefetch` - Fetch missing precache assets
/// - anything else - Intercepted by the gateway
///
/// CORS applies to the admin endpoints only. Proxied traffic, preflights
/// included, reaches the origin untouched so its own CORS policy holds.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/caches", get(caches_handler))
        .route("/caches/:name", delete(clear_cache_handler))
        .route("/update", post(update_handler))
        .route("/update-check", post(update_check_handler))
        .route("/maintenance", post(maintenance_handler))
        .route("/prefetch", post(prefetch_handler))
        .layer(cors);

    Router::new()
        .nest("/_sw", admin)
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
