//! Reverse-proxy fallback: every request not claimed by a local route is
//! forwarded to the upstream origin through the [`AuthorizedClient`].
//!
//! [`AuthorizedClient`]: domru_auth::AuthorizedClient

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, Method, Uri,
        header::{CONNECTION, HOST, HeaderName},
    },
    response::Response,
};
use bytes::Bytes;
use domru_auth::UpstreamRequest;
use std::sync::Arc;

use crate::{AppState, error::ApiError};

/// Headers that must not be forwarded (hop-by-hop).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Copy `headers` without hop-by-hop fields, including any named in `Connection`.
fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || listed.iter().any(|l| l == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn request_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = end_to_end_headers(inbound);
    headers.remove(HOST);
    headers
}

/// `ANY /{*rest}` fallback.
pub async fn reverse_proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut url = state.upstream.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());

    tracing::debug!(%method, path = uri.path(), "forwarding to upstream");
    let request = UpstreamRequest::new(method, url)
        .with_headers(request_headers(&headers))
        .with_body(body);
    let upstream = state.client.execute(request).await?;

    let status = upstream.status();
    let resp_headers = end_to_end_headers(upstream.headers());
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = resp_headers;
    Ok(response)
}

/// Whether `name` is stripped in both directions.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}
