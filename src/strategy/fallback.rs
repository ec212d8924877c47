//! Synthesized fallback responses, used when neither network nor cache can
//! answer. Each stub matches the content type the client asked for so a
//! missing stylesheet or script does not break the page.

use http::StatusCode;
use url::Url;

use crate::models::{Destination, GatewayResponse};

const OFFLINE_HTML: &str = "<!DOCTYPE html>\n\
<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\n\
<body style=\"font-family:sans-serif;text-align:center;padding:2rem;\">\n\
<h1>You're Offline</h1>\n\
<p>Please check your internet connection and try again.</p>\n\
<button onclick=\"location.reload()\">Retry</button>\n\
</body></html>\n";

/// Minimal offline document, for when no offline page was precached.
pub fn offline_document() -> GatewayResponse {
    GatewayResponse::synthesized(
        StatusCode::SERVICE_UNAVAILABLE,
        "text/html; charset=utf-8",
        OFFLINE_HTML,
    )
}

/// CacheFirst / StaleWhileRevalidate with no network and no cache.
pub fn unavailable() -> GatewayResponse {
    GatewayResponse::synthesized(
        StatusCode::NOT_FOUND,
        "text/plain; charset=utf-8",
        "Resource unavailable",
    )
}

/// NetworkFirst with no network and no cache.
pub fn offline_resource() -> GatewayResponse {
    GatewayResponse::synthesized(
        StatusCode::SERVICE_UNAVAILABLE,
        "text/plain; charset=utf-8",
        "Offline - Resource unavailable",
    )
}

/// Content-type appropriate stub for a request that failed outright.
pub fn error_stub(url: &Url, destination: Destination) -> GatewayResponse {
    let path = url.path();

    if path.ends_with(".css") || destination == Destination::Style {
        return GatewayResponse::synthesized(
            StatusCode::SERVICE_UNAVAILABLE,
            "text/css",
            "/* Offline - CSS unavailable */",
        );
    }

    if path.ends_with(".js") || destination == Destination::Script {
        let script = format!(
            "console.warn('Offline - Script unavailable: {}');",
            path.replace('\\', "\\\\").replace('\'', "\\'")
        );
        return GatewayResponse::synthesized(
            StatusCode::SERVICE_UNAVAILABLE,
            "application/javascript",
            script,
        );
    }

    if destination.is_document() {
        return offline_document();
    }

    GatewayResponse::synthesized(
        StatusCode::SERVICE_UNAVAILABLE,
        "text/plain; charset=utf-8",
        "Resource unavailable offline",
    )
}
