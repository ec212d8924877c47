//! Interception Gateway
//!
//! Single entry point for every request: classify, pick the class's
//! strategy, run it, stamp the response. Strategies run in their own task so
//! a panic inside one becomes a content-type stub instead of a dropped
//! connection.

use std::sync::Arc;
use std::time::Instant;

use http::HeaderValue;
use tracing::{debug, error};

use crate::cache::SharedStore;
use crate::classify::RequestClassifier;
use crate::config::{Config, RouteTable, StrategyKind};
use crate::error::{GatewayError, Result};
use crate::lifecycle::CacheLifecycleManager;
use crate::models::{CacheRequest, GatewayResponse, SOURCE_HEADER};
use crate::strategy::{fallback, StrategyContext, StrategyEngine};
use crate::telemetry::{CacheEvent, Telemetry};
use crate::upstream::Upstream;

// == Interception Gateway ==
#[derive(Clone)]
pub struct InterceptionGateway {
    classifier: RequestClassifier,
    routes: RouteTable,
    engine: StrategyEngine,
    lifecycle: Arc<CacheLifecycleManager>,
    telemetry: Telemetry,
}

impl InterceptionGateway {
    /// Wires classifier, strategy engine and lifecycle manager around one
    /// store and one upstream.
    pub fn new(
        config: &Config,
        store: SharedStore,
        upstream: Arc<dyn Upstream>,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let classifier = RequestClassifier::new(config)?;
        let engine = StrategyEngine::new(
            config,
            &classifier,
            store.clone(),
            Arc::clone(&upstream),
            telemetry.clone(),
        )?;
        let lifecycle = Arc::new(CacheLifecycleManager::new(
            config,
            classifier.clone(),
            store,
            upstream,
        ));

        Ok(Self {
            classifier,
            routes: config.routes.clone(),
            engine,
            lifecycle,
            telemetry,
        })
    }

    pub fn lifecycle(&self) -> &Arc<CacheLifecycleManager> {
        &self.lifecycle
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    // == Handle ==
    /// Answers one request. Never fails: every error path ends in a
    /// synthesized response.
    pub async fn handle(&self, request: CacheRequest) -> GatewayResponse {
        let started = Instant::now();
        let ctx = self.context(request);

        let engine = self.engine.clone();
        let task_ctx = ctx.clone();
        let mut response = match tokio::spawn(async move { engine.execute(&task_ctx).await }).await {
            Ok(response) => response,
            Err(join_error) => {
                let err = GatewayError::UnhandledStrategy(join_error.to_string());
                error!(key = %ctx.key, class = %ctx.class, error = %err, "Strategy failed");
                self.telemetry.emit(CacheEvent::FallbackServed {
                    key: ctx.key.clone(),
                    class: ctx.class,
                    reason: "strategy failed",
                });
                fallback::error_stub(&ctx.request.url, ctx.request.destination)
            }
        };

        response
            .headers
            .insert(SOURCE_HEADER, HeaderValue::from_static(response.source.as_str()));

        self.telemetry.emit(CacheEvent::StrategyUsed {
            class: ctx.class,
            strategy: ctx.kind(),
            source: response.source,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        response
    }

    /// Classifies the request and selects its strategy. Until the cache is
    /// active every cacheable class is a plain network fetch.
    fn context(&self, request: CacheRequest) -> StrategyContext {
        let class = self.classifier.classify(&request);
        let key = self.classifier.request_key(&request);
        let mut config = *self.routes.for_class(class);

        if class.is_cacheable() && !self.lifecycle.is_ready() {
            debug!(key = %key, state = %self.lifecycle.state(), "Cache not ready, forcing network");
            config.kind = StrategyKind::NetworkOnly;
        }

        StrategyContext::new(request, key, class, config)
    }
}
