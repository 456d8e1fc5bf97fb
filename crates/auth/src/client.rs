//! Authorized, self-healing upstream client.
//!
//! Per request: attach credentials, send through the [`RetryingTransport`],
//! and on an authorization failure refresh once and resend once. A second
//! rejection or a failed refresh ends in [`GatewayError::AuthExpired`]; there
//! is never a third attempt.

use crate::{
    interceptor::{AuthInterceptor, TokenInterceptor},
    manager::TokenManager,
    request::UpstreamRequest,
    retry::RetryingTransport,
};
use domru_types::{GatewayError, Result};
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthorizedClient {
    transport: RetryingTransport,
    interceptor: Arc<dyn AuthInterceptor>,
}

impl AuthorizedClient {
    #[must_use]
    pub fn new(transport: RetryingTransport, interceptor: Arc<dyn AuthInterceptor>) -> Self {
        Self {
            transport,
            interceptor,
        }
    }

    /// Client authorizing through `manager`'s bearer token and operator id.
    #[must_use]
    pub fn with_token_manager(transport: RetryingTransport, manager: Arc<TokenManager>) -> Self {
        Self::new(transport, Arc::new(TokenInterceptor::new(manager)))
    }

    /// Send `request` with credentials attached, repairing the session once if needed.
    ///
    /// The response is returned whatever its status (other than an auth
    /// failure), with the body unread so callers may stream it.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::NoCredentials`] if no session can be attached.
    /// - [`GatewayError::Http`] on transport failure after connection retries.
    /// - [`GatewayError::AuthExpired`] if the refresh fails or the refreshed
    ///   session is rejected as well.
    pub async fn execute(&self, mut request: UpstreamRequest) -> Result<Response> {
        let ticket = self.interceptor.prepare(&mut request.headers).await?;
        let resp = self.transport.send(&request).await?;
        if !self.interceptor.is_auth_failure(resp.status()) {
            return Ok(resp);
        }
        drop(resp);

        tracing::info!(
            method = %request.method,
            path = request.url.path(),
            "upstream rejected session, refreshing"
        );
        if let Err(e) = self.interceptor.refresh(ticket).await {
            tracing::warn!(error = %e, "session refresh failed");
            return Err(match e {
                GatewayError::AuthExpired(msg) => GatewayError::AuthExpired(msg),
                other => GatewayError::AuthExpired(format!("refresh failed: {other}")),
            });
        }

        self.interceptor.prepare(&mut request.headers).await?;
        let resp = self.transport.send(&request).await?;
        if self.interceptor.is_auth_failure(resp.status()) {
            tracing::warn!(
                method = %request.method,
                path = request.url.path(),
                "refreshed session rejected"
            );
            return Err(GatewayError::AuthExpired(
                "upstream rejected the refreshed session".into(),
            ));
        }
        Ok(resp)
    }

    /// Like [`execute`](Self::execute) but turns non-2xx statuses into
    /// [`GatewayError::Upstream`].
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute); additionally `Upstream` on non-success.
    pub async fn execute_checked(&self, request: UpstreamRequest) -> Result<Response> {
        let resp = self.execute(request).await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Send `request` and decode a successful JSON response.
    ///
    /// # Errors
    ///
    /// See [`execute_checked`](Self::execute_checked); additionally
    /// `Serialization` if the body is not the expected JSON.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: UpstreamRequest) -> Result<T> {
        let resp = self.execute_checked(request).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
