//! Session lifecycle against the upstream auth endpoint.
//!
//! Responsibilities:
//! - Read the access token / operator id from the [`CredentialsStore`] on
//!   every call (no in-process cache).
//! - Exchange the refresh token for a new session and persist it.
//! - Serialize refreshes: one refresh runs at a time, and callers whose
//!   request was authorized before the latest completed refresh reuse its
//!   outcome instead of starting another one.
use crate::{interceptor::RefreshTicket, request::UpstreamRequest, retry::RetryingTransport};
use async_trait::async_trait;
use domru_types::{
    AuthenticationResponse, Credentials, CredentialsStore, GatewayError, Result, TokenProvider,
    redact,
};
use reqwest::Url;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::Mutex;

/// Upstream session-refresh endpoint, relative to the API origin.
pub const REFRESH_SESSION_PATH: &str = "/auth/v2/session/refresh";

/// Outcome of the most recently completed refresh.
#[derive(Default)]
struct RefreshGate {
    last_failure: Option<String>,
}

pub struct TokenManager {
    store: Arc<dyn CredentialsStore>,
    transport: RetryingTransport,
    refresh_url: Url,
    gate: Mutex<RefreshGate>,
    /// Number of completed refreshes; bumped while `gate` is held.
    epoch: AtomicU64,
}

impl TokenManager {
    /// Creates a manager refreshing against `upstream` (the API origin).
    ///
    /// Refresh requests are sent exactly once; `transport`'s retry budget
    /// does not apply to them.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if `upstream` cannot be joined with the refresh path.
    pub fn new(
        store: Arc<dyn CredentialsStore>,
        transport: RetryingTransport,
        upstream: &Url,
    ) -> Result<Self> {
        let refresh_url = upstream
            .join(REFRESH_SESSION_PATH)
            .map_err(|e| GatewayError::Config(format!("refresh url: {e}")))?;
        Ok(Self {
            store,
            transport: transport.single_attempt(),
            refresh_url,
            gate: Mutex::new(RefreshGate::default()),
            epoch: AtomicU64::new(0),
        })
    }

    /// Ticket identifying the refresh generation a request is authorized under.
    #[must_use]
    pub fn ticket(&self) -> RefreshTicket {
        RefreshTicket::new(self.epoch.load(Ordering::Acquire))
    }

    /// Refresh on behalf of a request that was rejected with `ticket`.
    ///
    /// If another refresh completed after `ticket` was issued, its outcome is
    /// reused and no upstream call is made.
    ///
    /// # Errors
    ///
    /// Returns the refresh error, or [`GatewayError::AuthExpired`] when the
    /// reused refresh had failed.
    pub async fn refresh_after_failure(&self, ticket: RefreshTicket) -> Result<()> {
        let mut gate = self.gate.lock().await;
        if self.epoch.load(Ordering::Acquire) != ticket.epoch() {
            tracing::debug!("session already refreshed by a concurrent request");
            return match &gate.last_failure {
                Some(msg) => Err(GatewayError::AuthExpired(msg.clone())),
                None => Ok(()),
            };
        }
        self.refresh_locked(&mut gate).await
    }

    async fn refresh_locked(&self, gate: &mut RefreshGate) -> Result<()> {
        let outcome = self.exchange_refresh_token().await;
        gate.last_failure = outcome.as_ref().err().map(ToString::to_string);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn exchange_refresh_token(&self) -> Result<()> {
        tracing::debug!("refreshing session");
        let current = self.store.load().await?;
        if !current.can_refresh() {
            return Err(GatewayError::NoCredentials(
                "stored credentials lack a refresh token or operator id".into(),
            ));
        }

        let request = UpstreamRequest::get(self.refresh_url.clone())
            .with_header("bearer", &current.refresh_token)
            .with_header("operator", current.operator_id.to_string());
        let resp = self.transport.send(&request).await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let auth: AuthenticationResponse =
            serde_json::from_slice(&body).map_err(|e| GatewayError::Upstream {
                status: status.as_u16(),
                body: format!("invalid authentication response: {e}"),
            })?;
        let mut renewed = Credentials::try_from(auth)?;
        if renewed.operator_id == 0 {
            renewed.operator_id = current.operator_id;
        }

        self.store.save(&renewed).await?;
        tracing::info!(
            operator_id = renewed.operator_id,
            access_token = %redact(&renewed.access_token),
            "session refreshed"
        );
        Ok(())
    }
}

#[async_trait]
impl TokenProvider for TokenManager {
    async fn current_operator_id(&self) -> Result<i64> {
        Ok(self.store.load().await?.operator_id)
    }

    async fn current_token(&self) -> Result<String> {
        let credentials = self.store.load().await.inspect_err(|e| {
            tracing::warn!(error = %e, "load credentials");
        })?;
        Ok(credentials.access_token)
    }

    async fn refresh(&self) -> Result<()> {
        let mut gate = self.gate.lock().await;
        self.refresh_locked(&mut gate).await
    }
}
