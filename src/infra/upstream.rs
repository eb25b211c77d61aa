//! Forwarding handler that relays requests to the configured origin.

use std::{sync::Arc, time::Duration};

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics::counter;
use reqwest::{Client, redirect};
use tracing::warn;
use url::Url;

use crate::config::UpstreamSettings;

use super::error::InfraError;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// HTTP client bound to one origin.
#[derive(Clone)]
pub struct Upstream {
    inner: Arc<UpstreamInner>,
}

struct UpstreamInner {
    client: Client,
    base_url: Url,
    max_body_bytes: usize,
}

impl Upstream {
    pub fn new(base_url: Url, timeout: Duration, max_body_bytes: usize) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| InfraError::upstream(format!("failed to build http client: {err}")))?;

        Ok(Self {
            inner: Arc::new(UpstreamInner {
                client,
                base_url,
                max_body_bytes,
            }),
        })
    }

    pub fn from_settings(settings: &UpstreamSettings) -> Result<Self, InfraError> {
        let base_url = settings
            .base_url
            .clone()
            .ok_or_else(|| InfraError::configuration("`upstream.url` is required to serve"))?;
        let max_body_bytes = usize::try_from(settings.max_body_bytes.get()).map_err(|_| {
            InfraError::configuration("`upstream.max_body_bytes` exceeds supported range")
        })?;
        Self::new(base_url, settings.timeout, max_body_bytes)
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }
}

/// Relay `request` to the origin and return its response with hop-by-hop
/// headers removed. Transport failures become `502 Bad Gateway`.
pub async fn forward(State(upstream): State<Upstream>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let target = target_url(upstream.base_url(), parts.uri.path(), parts.uri.query());

    let body = match to_bytes(body, upstream.inner.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                error = %err,
                "rejecting request body"
            );
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    if let Some(host) = headers.remove(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host);
    }

    let sent = upstream
        .inner
        .client
        .request(parts.method.clone(), target.clone())
        .headers(headers)
        .body(body)
        .send()
        .await;

    let origin_response = match sent {
        Ok(response) => response,
        Err(err) => return bad_gateway(&parts.method, &target, &err),
    };

    let status = origin_response.status();
    let mut headers = origin_response.headers().clone();
    strip_hop_by_hop(&mut headers);

    let bytes = match origin_response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return bad_gateway(&parts.method, &target, &err),
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn bad_gateway(method: &axum::http::Method, target: &Url, err: &reqwest::Error) -> Response {
    counter!("simplecache_upstream_error_total").increment(1);
    warn!(
        method = %method,
        target = %target,
        timeout = err.is_timeout(),
        error = %err,
        "upstream request failed"
    );
    (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
}

/// Append the request path and query to the origin's base path.
fn target_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(query);
    url
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value: &HeaderValue| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(listed.iter()) {
        headers.remove(name);
    }
}
