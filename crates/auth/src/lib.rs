//! Session keeping and authorized transport for the upstream API.
//!
//! - [`RetryingTransport`] applies connection-level retries with backoff.
//! - [`TokenManager`] owns the session-refresh protocol and serializes
//!   refreshes behind a single gate.
//! - [`AuthorizedClient`] attaches credentials to every request and performs
//!   the refresh-and-retry-once protocol through an [`AuthInterceptor`].

pub mod client;
pub mod interceptor;
pub mod manager;
pub mod request;
pub mod retry;

pub use client::AuthorizedClient;
pub use interceptor::{AuthInterceptor, RefreshTicket, TokenInterceptor};
pub use manager::TokenManager;
pub use request::UpstreamRequest;
pub use retry::{RetryPolicy, RetryingTransport, build_http_client};

#[cfg(test)]
pub(crate) mod test_support;
