//! Scripted upstream for unit tests: canned responses by path, an offline
//! switch and call counting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};

use super::{FetchError, Upstream, UpstreamRequest};
use crate::models::{GatewayResponse, ResponseSource};

#[derive(Default)]
pub struct MockUpstream {
    routes: Mutex<HashMap<String, (StatusCode, &'static str, Bytes)>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    requests: Mutex<Vec<UpstreamRequest>>,
    delay: Mutex<Duration>,
    panic_path: Mutex<Option<String>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, path: &str, status: StatusCode, content_type: &'static str, body: &str) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            (status, content_type, Bytes::from(body.to_string())),
        );
    }

    pub fn ok(&self, path: &str, content_type: &'static str, body: &str) {
        self.route(path, StatusCode::OK, content_type, body);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn panic_on(&self, path: &str) {
        *self.panic_path.lock().unwrap() = Some(path.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }

    pub fn last_request(&self) -> Option<UpstreamRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<GatewayResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let path = request.url.path().to_string();
        if self.panic_path.lock().unwrap().as_deref() == Some(path.as_str()) {
            panic!("upstream exploded for {}", path);
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Connect("network is offline".to_string()));
        }

        let route = self.routes.lock().unwrap().get(&path).cloned();
        let (status, content_type, body) =
            route.unwrap_or((StatusCode::NOT_FOUND, "text/plain", Bytes::from_static(b"not found")));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Ok(GatewayResponse::new(status, headers, body, ResponseSource::Network))
    }
}
