//! Offline Cache - an offline-first caching gateway
//!
//! Runs the interception gateway in front of `UPSTREAM_ORIGIN`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_cache::cache::{flush_mirror, CacheStore, DiskMirror};
use offline_cache::telemetry::DEFAULT_EVENT_BUFFER;
use offline_cache::{
    create_router, maintenance_channel, spawn_maintenance_timer, spawn_maintenance_worker,
    spawn_telemetry_logger, AppState, Config, HttpUpstream, InterceptionGateway, Telemetry,
};

/// Main entry point for the caching gateway.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the cache store, restoring partitions from `DATA_DIR` if set
/// 4. Wire upstream client, telemetry and gateway
/// 5. Install and activate the current cache version in the background
/// 6. Start the maintenance worker and timer
/// 7. Serve until SIGINT/SIGTERM, then abort background tasks and flush
///    pending disk writes
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offline_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting offline cache gateway");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        "Configuration loaded: origin={}, version={}, port={}, maintenance_interval={}s",
        config.upstream_origin, config.version, config.server_port, config.maintenance_interval
    );

    let store = match &config.data_dir {
        Some(dir) => {
            let mirror = DiskMirror::open(dir)
                .with_context(|| format!("cannot open data dir {}", dir.display()))?;
            CacheStore::with_mirror(config.partition_capacity, config.max_body_bytes, mirror)?
        }
        None => CacheStore::new(config.partition_capacity, config.max_body_bytes),
    }
    .shared();
    info!("Cache store initialized");

    let upstream = Arc::new(HttpUpstream::new(config.upstream_max_body_bytes)?);
    let (telemetry, events) = Telemetry::new(DEFAULT_EVENT_BUFFER);
    let mut tasks = vec![spawn_telemetry_logger(events)];

    let gateway = InterceptionGateway::new(&config, store.clone(), upstream, telemetry)?;

    // Requests are served network-only until activation finishes
    let lifecycle = Arc::clone(gateway.lifecycle());
    tasks.push(tokio::spawn(async move {
        match lifecycle.start().await {
            Ok((install, activate)) => info!(
                cached = install.cached.len(),
                failed = install.failed.len(),
                deleted = activate.deleted.len(),
                "Cache version active"
            ),
            Err(e) => error!(error = %e, "Cache startup failed, staying network-only"),
        }
    }));

    let (maintenance, jobs) = maintenance_channel();
    tasks.push(spawn_maintenance_worker(Arc::clone(gateway.lifecycle()), jobs));
    tasks.push(spawn_maintenance_timer(
        maintenance.clone(),
        config.maintenance_interval,
    ));
    info!("Background maintenance started");

    let state = AppState::new(&config, gateway, store.clone(), maintenance);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!("Gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tasks))
        .await
        .context("server error")?;

    flush_mirror(&store).await;
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts the
/// background tasks.
async fn shutdown_signal(tasks: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for task in &tasks {
        task.abort();
    }
    warn!(count = tasks.len(), "Background tasks aborted");
}
