//! Authorization capability used by [`AuthorizedClient`](crate::AuthorizedClient).
//!
//! The retry-once state machine only sees three operations: prepare a request,
//! classify a response status, refresh. [`TokenInterceptor`] implements them
//! on top of [`TokenManager`].

use crate::manager::TokenManager;
use async_trait::async_trait;
use domru_types::{GatewayError, Result, TokenProvider};
use reqwest::{
    StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue},
};
use std::sync::Arc;

/// Header carrying the operator id on authorized requests.
pub const OPERATOR_HEADER: &str = "operator";

/// Refresh generation observed when a request was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket(u64);

impl RefreshTicket {
    #[must_use]
    pub fn new(epoch: u64) -> Self {
        Self(epoch)
    }

    #[must_use]
    pub fn epoch(self) -> u64 {
        self.0
    }
}

#[async_trait]
pub trait AuthInterceptor: Send + Sync {
    /// Attach credentials to `headers`, replacing any existing values.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NoCredentials`] when no session can be attached.
    async fn prepare(&self, headers: &mut HeaderMap) -> Result<RefreshTicket>;

    /// Whether `status` means the attached session was rejected.
    fn is_auth_failure(&self, status: StatusCode) -> bool {
        status == StatusCode::UNAUTHORIZED
    }

    /// Renew the session for a request prepared under `ticket`.
    async fn refresh(&self, ticket: RefreshTicket) -> Result<()>;
}

/// Bearer token + `Operator` header interceptor backed by a [`TokenManager`].
pub struct TokenInterceptor {
    manager: Arc<TokenManager>,
}

impl TokenInterceptor {
    #[must_use]
    pub fn new(manager: Arc<TokenManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl AuthInterceptor for TokenInterceptor {
    async fn prepare(&self, headers: &mut HeaderMap) -> Result<RefreshTicket> {
        let ticket = self.manager.ticket();
        let token = self
            .manager
            .current_token()
            .await
            .map_err(|e| GatewayError::NoCredentials(e.to_string()))?;
        let operator_id = self
            .manager
            .current_operator_id()
            .await
            .map_err(|e| GatewayError::NoCredentials(e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| GatewayError::NoCredentials("access token is not a valid header".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            HeaderName::from_static(OPERATOR_HEADER),
            HeaderValue::from(operator_id),
        );
        Ok(ticket)
    }

    async fn refresh(&self, ticket: RefreshTicket) -> Result<()> {
        self.manager.refresh_after_failure(ticket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_transport, unused_port_url};
    use domru_store::InMemoryCredentialsStore;
    use domru_types::Credentials;

    async fn interceptor(store: InMemoryCredentialsStore) -> TokenInterceptor {
        let base = unused_port_url().await;
        let manager = TokenManager::new(Arc::new(store), fast_transport(), &base).unwrap();
        TokenInterceptor::new(Arc::new(manager))
    }

    #[tokio::test]
    async fn test_prepare_sets_headers() {
        let i = interceptor(InMemoryCredentialsStore::with(Credentials::new("at", "rt", 77))).await;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic client-supplied"));
        let ticket = i.prepare(&mut headers).await.unwrap();
        assert_eq!(ticket.epoch(), 0);
        assert_eq!(headers[AUTHORIZATION], "Bearer at");
        assert_eq!(headers[OPERATOR_HEADER], "77");
        assert_eq!(headers.get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_prepare_without_credentials() {
        let i = interceptor(InMemoryCredentialsStore::new()).await;
        let err = i.prepare(&mut HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoCredentials(_)));
    }

    #[tokio::test]
    async fn test_default_auth_failure_marker() {
        let i = interceptor(InMemoryCredentialsStore::new()).await;
        assert!(i.is_auth_failure(StatusCode::UNAUTHORIZED));
        assert!(!i.is_auth_failure(StatusCode::FORBIDDEN));
        assert!(!i.is_auth_failure(StatusCode::OK));
    }
}
