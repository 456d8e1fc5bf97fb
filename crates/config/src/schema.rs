use domru_types::Credentials;
use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized},
    value::Dict,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Broker address inside the Home Assistant supervisor network.
pub const SUPERVISOR_BROKER_HOST: &str = "172.30.32.1";

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "DOMRU_";

/// Options-file keys spelled like the command-line flags, and their field names.
const FLAG_STYLE_KEYS: &[(&str, &str)] = &[
    ("refresh-token", "refresh_token"),
    ("operator-id", "operator_id"),
    ("log-level", "log_level"),
];

fn default_port() -> u16 {
    8080
}
fn default_credentials() -> PathBuf {
    PathBuf::from("/data/accounts.json")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_upstream_url() -> String {
    "https://myhome.proptech.ru".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_user() -> String {
    "domru_proxy".to_string()
}
fn default_settle_delay() -> u64 {
    2
}
fn default_relock_delay() -> u64 {
    5
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host. When unset the bridge only runs inside Home Assistant.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_user")]
    pub username: String,
    #[serde(default = "default_mqtt_user")]
    pub password: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_mqtt_port(),
            username: default_mqtt_user(),
            password: default_mqtt_user(),
        }
    }
}

impl MqttConfig {
    /// Resolve the broker host.
    ///
    /// An explicit `host` wins; otherwise the supervisor broker is used when
    /// running as an add-on. `None` disables the bridge.
    #[must_use]
    pub fn resolve_host(&self, under_supervisor: bool) -> Option<String> {
        match self.host.as_deref() {
            Some(h) if !h.is_empty() => Some(h.to_string()),
            _ if under_supervisor => Some(SUPERVISOR_BROKER_HOST.to_string()),
            _ => None,
        }
    }
}

/// Device bridge timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Delay between broker connect and the discovery cycle.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
    /// Delay after a successful door open before `LOCKED` is published again.
    #[serde(default = "default_relock_delay")]
    pub relock_delay_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: default_settle_delay(),
            relock_delay_secs: default_relock_delay(),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    #[must_use]
    pub fn relock_delay(&self) -> Duration {
        Duration::from_secs(self.relock_delay_secs)
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen port (defaults to 8080).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Credentials file path (defaults to `/data/accounts.json`).
    #[serde(default = "default_credentials")]
    pub credentials: PathBuf,
    /// Log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Refresh token supplied by the operator; overrides stored credentials at startup.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Operator id paired with `refresh_token`.
    #[serde(default)]
    pub operator_id: Option<i64>,
    /// Upstream API origin that unclaimed requests are proxied to.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            credentials: default_credentials(),
            log_level: default_log_level(),
            refresh_token: None,
            operator_id: None,
            upstream_url: default_upstream_url(),
            mqtt: MqttConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    /// Builds the layered figment: defaults, then the options file (if it
    /// exists), then `DOMRU_*` environment variables (`__` separates nesting,
    /// e.g. `DOMRU_MQTT__HOST`).
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the options file cannot be parsed.
    #[allow(clippy::result_large_err)]
    pub fn figment(path: Option<&Path>) -> Result<Figment, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Serialized::defaults(options_file(path)?));
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Loads the layered configuration.
    ///
    /// A missing options file is not an error; defaults and environment apply.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file or an environment value cannot be parsed.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path)?.extract()
    }

    /// Credentials that must replace the stored record at startup, if the
    /// operator supplied both a refresh token and a non-zero operator id.
    #[must_use]
    pub fn credentials_override(&self) -> Option<Credentials> {
        let token = self.refresh_token.as_deref().filter(|t| !t.is_empty())?;
        let operator_id = self.operator_id.filter(|id| *id != 0)?;
        Some(Credentials::from_refresh_token(token, operator_id))
    }
}

/// Read the options file, accepting flag-style keys (`log-level`) for the
/// top-level fields. A missing file yields an empty dictionary.
#[allow(clippy::result_large_err)]
fn options_file(path: &Path) -> Result<Dict, figment::Error> {
    let mut dict: Dict = Figment::from(Json::file(path)).extract()?;
    for (flag, field) in FLAG_STYLE_KEYS {
        if let Some(value) = dict.remove(*flag) {
            dict.entry((*field).to_owned()).or_insert(value);
        }
    }
    Ok(dict)
}
