//! Connection-level retries beneath the authorization layer.
//!
//! Transport failures and transient statuses (429, 5xx except 501) are retried
//! with exponential backoff, up to [`RetryPolicy::max_attempts`] attempts in
//! total. When every attempt returns a transient status the last response is
//! handed back unchanged, so a proxied caller still sees the upstream answer.

use crate::request::UpstreamRequest;
use domru_types::{GatewayError, Result, error::is_retryable_status};
use reqwest::{Client, Response};
use std::time::Duration;

/// Per-attempt timeout of the shared HTTP client.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client used for all upstream traffic.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] if the TLS backend cannot be initialised.
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| GatewayError::Config(format!("http client: {e}")))
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.min_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Sends [`UpstreamRequest`]s with the configured [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryingTransport {
    http: Client,
    policy: RetryPolicy,
}

impl RetryingTransport {
    #[must_use]
    pub fn new(http: Client, policy: RetryPolicy) -> Self {
        Self { http, policy }
    }

    /// Same client, one attempt per send.
    #[must_use]
    pub fn single_attempt(&self) -> Self {
        Self {
            http: self.http.clone(),
            policy: RetryPolicy {
                max_attempts: 1,
                ..self.policy.clone()
            },
        }
    }

    /// Send `request`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Http`] when the final attempt fails at the
    /// transport level.
    pub async fn send(&self, request: &UpstreamRequest) -> Result<Response> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match request.build(&self.http).send().await {
                Ok(resp)
                    if attempt < max_attempts && is_retryable_status(resp.status().as_u16()) =>
                {
                    tracing::warn!(
                        method = %request.method,
                        path = request.url.path(),
                        status = resp.status().as_u16(),
                        attempt,
                        "transient upstream status, retrying"
                    );
                }
                Ok(resp) => return Ok(resp),
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        method = %request.method,
                        path = request.url.path(),
                        error = %e,
                        attempt,
                        "upstream transport error, retrying"
                    );
                }
                Err(e) => {
                    return Err(GatewayError::Http(format!(
                        "{} {}: giving up after {attempt} attempts: {e}",
                        request.method,
                        request.url.path()
                    )));
                }
            }
            tokio::time::sleep(self.policy.backoff(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_transport, spawn_stub, unused_port_url};
    use axum::{Router, http::StatusCode, routing::get};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn test_default_policy_five_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts, 5);
    }

    fn flaky_router(failures: usize, hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/flaky",
            get(move || {
                let hits = Arc::clone(&hits);
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy")
                    } else {
                        (StatusCode::OK, "ok")
                    }
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_retries_transient_status_until_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_stub(flaky_router(2, Arc::clone(&hits))).await;
        let req = UpstreamRequest::get(base.join("/flaky").unwrap());

        let resp = fast_transport().send(&req).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts_and_returns_last_response() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_stub(flaky_router(usize::MAX, Arc::clone(&hits))).await;
        let req = UpstreamRequest::get(base.join("/flaky").unwrap());

        let resp = fast_transport().send(&req).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/missing",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::NOT_FOUND }
            }),
        );
        let base = spawn_stub(router).await;
        let req = UpstreamRequest::get(base.join("/missing").unwrap());

        let resp = fast_transport().send(&req).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        let req = UpstreamRequest::get(unused_port_url().await.join("/x").unwrap());
        let err = fast_transport().send(&req).await.unwrap_err();
        assert!(matches!(err, GatewayError::Http(_)));
        assert!(err.to_string().contains("5 attempts"));
    }

    #[tokio::test]
    async fn test_single_attempt_sends_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_stub(flaky_router(usize::MAX, Arc::clone(&hits))).await;
        let req = UpstreamRequest::get(base.join("/flaky").unwrap());

        let resp = fast_transport().single_attempt().send(&req).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
