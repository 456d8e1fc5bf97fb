//! Home Assistant supervisor lookups, available when running as an add-on.

use domru_types::{GatewayError, Result};
use reqwest::{Client, header::AUTHORIZATION};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable set by the supervisor for add-on containers.
pub const SUPERVISOR_TOKEN_ENV: &str = "SUPERVISOR_TOKEN";

pub const NETWORK_INFO_URL: &str = "http://supervisor/network/info";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    #[serde(default)]
    result: String,
    #[serde(default)]
    data: NetworkData,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkData {
    #[serde(default)]
    interfaces: Vec<Interface>,
}

#[derive(Debug, Deserialize)]
struct Interface {
    #[serde(default)]
    ipv4: Option<Ipv4>,
}

#[derive(Debug, Deserialize)]
struct Ipv4 {
    #[serde(default)]
    address: Vec<String>,
}

/// Supervisor token from the environment, if running under the supervisor.
#[must_use]
pub fn supervisor_token() -> Option<String> {
    std::env::var(SUPERVISOR_TOKEN_ENV)
        .ok()
        .filter(|t| !t.is_empty())
}

/// Extract the first interface's IPv4 address, without its prefix length.
///
/// # Errors
///
/// [`GatewayError::Serialization`] on invalid JSON, [`GatewayError::Config`]
/// when the response is not `ok` or lists no address.
pub fn parse_network_info(body: &[u8]) -> Result<String> {
    let info: NetworkInfo = serde_json::from_slice(body)?;
    if info.result != "ok" {
        return Err(GatewayError::Config(format!(
            "supervisor network info result: {:?}",
            info.result
        )));
    }
    info.data
        .interfaces
        .first()
        .and_then(|i| i.ipv4.as_ref())
        .and_then(|ip| ip.address.first())
        .and_then(|a| a.split('/').next())
        .filter(|a| !a.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| GatewayError::Config("supervisor reported no ipv4 address".into()))
}

/// Ask the supervisor for the Home Assistant host's LAN address.
///
/// # Errors
///
/// Transport failures, non-2xx responses, timeouts and unparseable
/// responses are all returned as errors.
pub async fn ha_network_address(http: &Client, url: &str, token: &str) -> Result<String> {
    let lookup = async {
        let resp = http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        tracing::debug!(body = %String::from_utf8_lossy(&body), "supervisor network info");
        parse_network_info(&body)
    };
    tokio::time::timeout(LOOKUP_TIMEOUT, lookup)
        .await
        .map_err(|_| GatewayError::Http("supervisor network lookup timed out".into()))?
}
