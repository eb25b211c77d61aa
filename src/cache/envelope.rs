//! Response envelope codec.
//!
//! A cached response is persisted as a small JSON document: a format version,
//! the status code, headers grouped by name in first-seen order, and the body
//! as base64. Header values that are not visible ASCII are kept as base64 so
//! that every value round-trips byte for byte.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, response::Parts},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use futures::stream;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};

use super::error::{DecodeError, EncodeError};

/// Bumped whenever the persisted layout changes; older envelopes then decode
/// as errors and are replaced on the next miss.
pub const ENVELOPE_VERSION: u32 = 1;

/// A complete HTTP response as held by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    status: u16,
    headers: Vec<StoredHeader>,
    body: String,
}

#[derive(Serialize, Deserialize)]
struct StoredHeader {
    name: String,
    values: Vec<StoredValue>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Text(String),
    Binary { base64: String },
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        Self::new(parts.status, parts.headers.clone(), body)
    }

    /// Serialize into the persisted envelope format.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut headers = Vec::with_capacity(self.headers.keys_len());
        for name in self.headers.keys() {
            let values = self
                .headers
                .get_all(name)
                .iter()
                .map(|value| match value.to_str() {
                    Ok(text) => StoredValue::Text(text.to_string()),
                    Err(_) => StoredValue::Binary {
                        base64: STANDARD.encode(value.as_bytes()),
                    },
                })
                .collect();
            headers.push(StoredHeader {
                name: name.as_str().to_string(),
                values,
            });
        }

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            status: self.status.as_u16(),
            headers,
            body: STANDARD.encode(&self.body),
        };

        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Rebuild a response from a persisted envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(DecodeError::Version(envelope.version));
        }

        let status =
            StatusCode::from_u16(envelope.status).map_err(|_| DecodeError::Status(envelope.status))?;

        let mut headers = HeaderMap::new();
        for stored in envelope.headers {
            let name = HeaderName::from_bytes(stored.name.as_bytes()).map_err(|err| {
                DecodeError::Header {
                    name: stored.name.clone(),
                    reason: err.to_string(),
                }
            })?;
            for value in stored.values {
                let bytes = match value {
                    StoredValue::Text(text) => text.into_bytes(),
                    StoredValue::Binary { base64 } => STANDARD.decode(base64)?,
                };
                let value =
                    HeaderValue::from_bytes(&bytes).map_err(|err| DecodeError::Header {
                        name: stored.name.clone(),
                        reason: err.to_string(),
                    })?;
                headers.append(name.clone(), value);
            }
        }

        let body = STANDARD.decode(envelope.body)?;

        Ok(Self::new(status, headers, body))
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Serialize a response into envelope bytes.
pub fn encode(response: &CachedResponse) -> Result<Vec<u8>, EncodeError> {
    response.encode()
}

/// Decode envelope bytes into a response.
pub fn decode(bytes: &[u8]) -> Result<CachedResponse, DecodeError> {
    CachedResponse::decode(bytes)
}

/// Collect a response body so it can be both stored and sent on.
///
/// On failure the stream has already been consumed, so the rebuilt response
/// carries a body that fails on first poll. The client sees a broken body,
/// as it would have without the cache, rather than a clean empty one.
pub async fn buffer_response(
    response: Response,
) -> Result<(Response, CachedResponse), (Response, axum::Error)> {
    let (parts, body) = response.into_parts();
    match BodyExt::collect(body).await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let cached = CachedResponse::from_parts(&parts, bytes.clone());
            let rebuilt = Response::from_parts(parts, Body::from(bytes));
            Ok((rebuilt, cached))
        }
        Err(error) => {
            let replay = axum::Error::new(format!("response body failed: {error}"));
            let body = Body::from_stream(stream::iter([Err::<Bytes, _>(replay)]));
            let rebuilt = Response::from_parts(parts, body);
            Err((rebuilt, error))
        }
    }
}
