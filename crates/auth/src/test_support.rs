//! Stub upstream servers shared by this crate's tests.

use crate::retry::{RetryPolicy, RetryingTransport};
use axum::Router;
use reqwest::Url;
use std::time::Duration;

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_stub(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

/// A base URL on which nothing is listening.
pub async fn unused_port_url() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{addr}")).unwrap()
}

/// Transport with the production attempt budget but millisecond backoff.
pub fn fast_transport() -> RetryingTransport {
    RetryingTransport::new(
        reqwest::Client::new(),
        RetryPolicy {
            max_attempts: 5,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
    )
}
