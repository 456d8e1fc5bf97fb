//! Configuration loading for the domru gateway.
//!
//! Uses figment to layer built-in defaults, the Home Assistant add-on options
//! file (JSON) and `DOMRU_*` environment variables.

pub mod schema;

pub use schema::{BridgeConfig, Config, MqttConfig, SUPERVISOR_BROKER_HOST};
