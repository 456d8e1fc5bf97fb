//! Home Assistant MQTT discovery payloads.
//!
//! Field order is fixed by the struct definitions, so the serialized bytes for
//! an unchanged door are identical on every discovery run.

use crate::topics::{
    AVAILABILITY_TOPIC, DoorKey, PAYLOAD_LOCK, PAYLOAD_UNLOCK, STATE_LOCKED, STATE_UNLOCKED,
};
use domru_api::{Door, snapshot_path};
use domru_types::Result;
use serde::Serialize;

const ICON: &str = "mdi:door";
const MODEL: &str = "Doorphone";
const MANUFACTURER: &str = "Dom.ru";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: &'static str,
    pub manufacturer: &'static str,
}

/// Discovery config of a `lock` entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockDiscovery {
    pub name: String,
    pub unique_id: String,
    pub command_topic: String,
    pub state_topic: String,
    pub availability_topic: &'static str,
    pub payload_lock: &'static str,
    pub payload_unlock: &'static str,
    pub state_locked: &'static str,
    pub state_unlocked: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_picture: Option<String>,
    pub icon: &'static str,
    pub device: DeviceDescriptor,
}

impl LockDiscovery {
    /// Describe `door`. With `picture_base` (e.g. `http://192.168.1.5:8080`)
    /// the entity picture points at the gateway's proxied snapshot.
    #[must_use]
    pub fn for_door(door: &Door, picture_base: Option<&str>) -> Self {
        let key = DoorKey::new(door.access_control_id, door.place_id);
        Self {
            name: door.display_name.clone(),
            unique_id: key.entity_id(),
            command_topic: key.command_topic(),
            state_topic: key.state_topic(),
            availability_topic: AVAILABILITY_TOPIC,
            payload_lock: PAYLOAD_LOCK,
            payload_unlock: PAYLOAD_UNLOCK,
            state_locked: STATE_LOCKED,
            state_unlocked: STATE_UNLOCKED,
            entity_picture: picture_base.map(|base| {
                format!(
                    "{}{}",
                    base.trim_end_matches('/'),
                    snapshot_path(door.place_id, door.access_control_id)
                )
            }),
            icon: ICON,
            device: DeviceDescriptor {
                identifiers: vec![key.device_id()],
                name: door.display_name.clone(),
                model: MODEL,
                manufacturer: MANUFACTURER,
            },
        }
    }

    /// Serialized message body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Serialization`](domru_types::GatewayError::Serialization)
    /// if encoding fails.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
