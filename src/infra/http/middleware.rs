use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{debug, error, warn};

use crate::cache::CACHE_STATUS_HEADER;

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();
    let cache_status = response
        .headers()
        .get(CACHE_STATUS_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if status.is_server_error() {
        error!(
            target: "simplecache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            cache_status,
            "request failed",
        );
    } else if status.is_client_error() {
        warn!(
            target: "simplecache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            cache_status,
            "client request error",
        );
    } else {
        debug!(
            target: "simplecache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = elapsed_ms,
            cache_status,
            "request served",
        );
    }

    response
}
