//! Upstream response shapes and the derived door list.

use serde::{Deserialize, Serialize};

/// `GET /rest/v1/subscriberplaces` response envelope.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlacesResponse {
    #[serde(default)]
    pub data: Vec<SubscriberPlace>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberPlace {
    #[serde(default)]
    pub id: i64,
    pub place: Place,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: i64,
    #[serde(default)]
    pub access_controls: Vec<AccessControl>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControl {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

/// A controllable door, keyed by `(place_id, access_control_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Door {
    pub access_control_id: i64,
    pub place_id: i64,
    pub display_name: String,
}

impl PlacesResponse {
    /// Flatten places into doors, in response order.
    #[must_use]
    pub fn doors(&self) -> Vec<Door> {
        self.data
            .iter()
            .flat_map(|sp| {
                sp.place.access_controls.iter().map(move |ac| Door {
                    access_control_id: ac.id,
                    place_id: sp.place.id,
                    display_name: ac.name.clone(),
                })
            })
            .collect()
    }
}
