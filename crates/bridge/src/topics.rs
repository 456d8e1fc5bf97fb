//! Topic naming scheme shared by discovery, state and command messages.
//!
//! ```text
//! device id        domru-door_<accessControlID>_<placeID>
//! entity id        <device id>-open
//! discovery        homeassistant/lock/<entity id>/config
//! command          domru/<entity id>/command
//! state            domru/<entity id>/state
//! availability     domru_proxy/status
//! ```

use domru_types::{GatewayError, Result};

/// Wildcard subscription covering every entity's command topic.
pub const COMMAND_SUBSCRIPTION: &str = "domru/+/command";

/// Bridge-wide availability topic, carrying [`ONLINE`] / [`OFFLINE`].
pub const AVAILABILITY_TOPIC: &str = "domru_proxy/status";
pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

pub const PAYLOAD_LOCK: &str = "LOCK";
pub const PAYLOAD_UNLOCK: &str = "UNLOCK";
pub const STATE_LOCKED: &str = "LOCKED";
pub const STATE_UNLOCKED: &str = "UNLOCKED";

const DEVICE_PREFIX: &str = "domru-door_";
const ENTITY_SUFFIX: &str = "-open";
const COMMAND_PREFIX: &str = "domru/";
const COMMAND_SUFFIX: &str = "/command";

/// Identifies one door entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DoorKey {
    pub access_control_id: i64,
    pub place_id: i64,
}

impl DoorKey {
    #[must_use]
    pub fn new(access_control_id: i64, place_id: i64) -> Self {
        Self {
            access_control_id,
            place_id,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> String {
        format!(
            "{DEVICE_PREFIX}{}_{}",
            self.access_control_id, self.place_id
        )
    }

    #[must_use]
    pub fn entity_id(&self) -> String {
        format!("{}{ENTITY_SUFFIX}", self.device_id())
    }

    #[must_use]
    pub fn discovery_topic(&self) -> String {
        format!("homeassistant/lock/{}/config", self.entity_id())
    }

    #[must_use]
    pub fn command_topic(&self) -> String {
        format!("{COMMAND_PREFIX}{}{COMMAND_SUFFIX}", self.entity_id())
    }

    #[must_use]
    pub fn state_topic(&self) -> String {
        format!("domru/{}/state", self.entity_id())
    }
}

/// Inbound command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCommand {
    Lock,
    Unlock,
}

impl LockCommand {
    /// Parse a raw payload; anything but exactly `LOCK` / `UNLOCK` is rejected.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"LOCK" => Some(Self::Lock),
            b"UNLOCK" => Some(Self::Unlock),
            _ => None,
        }
    }
}

fn parse_id(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Resolve a command topic back to its door.
///
/// Only topics produced by [`DoorKey::command_topic`] are accepted.
///
/// # Errors
///
/// Returns [`GatewayError::MalformedTopic`] for anything else.
pub fn parse_command_topic(topic: &str) -> Result<DoorKey> {
    let malformed = || GatewayError::MalformedTopic(topic.to_owned());

    let (ac, place) = topic
        .strip_prefix(COMMAND_PREFIX)
        .and_then(|s| s.strip_suffix(COMMAND_SUFFIX))
        .and_then(|s| s.strip_prefix(DEVICE_PREFIX))
        .and_then(|s| s.strip_suffix(ENTITY_SUFFIX))
        .and_then(|s| s.split_once('_'))
        .ok_or_else(malformed)?;

    let key = DoorKey::new(
        parse_id(ac).ok_or_else(malformed)?,
        parse_id(place).ok_or_else(malformed)?,
    );
    // Rejects non-canonical spellings such as leading zeros.
    if key.command_topic() != topic {
        return Err(malformed());
    }
    Ok(key)
}
