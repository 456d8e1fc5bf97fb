//! HTTP front of the gateway: axum router, reverse proxy, and error mapping.
//!
//! Local routes are matched first; everything else falls through to
//! [`forward::reverse_proxy`], which replays the request against the upstream
//! origin with the current session attached.

mod error;
pub mod forward;

pub use error::ApiError;

use axum::{Json, Router, extract::DefaultBodyLimit, routing::get};
use domru_auth::AuthorizedClient;
use reqwest::Url;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state passed to all route handlers.
pub struct AppState {
    /// Authorized upstream client shared with the MQTT bridge.
    pub client: Arc<AuthorizedClient>,
    /// Upstream origin; inbound path and query are appended verbatim.
    pub upstream: Url,
}

impl AppState {
    #[must_use]
    pub fn new(client: Arc<AuthorizedClient>, upstream: Url) -> Arc<Self> {
        Arc::new(Self { client, upstream })
    }
}

/// Build the full axum router.
///
/// Routes:
/// - GET /healthz        liveness, no upstream call
/// - ANY (fallback)      forwarded to the upstream origin
///
/// Request bodies are not size-limited; the upstream decides what it accepts.
pub fn make_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(forward::reverse_proxy)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
