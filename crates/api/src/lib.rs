//! Typed access to the handful of upstream endpoints the gateway calls itself.
//!
//! Everything else reaches the upstream through the reverse proxy untouched.
//! All calls go through an [`AuthorizedClient`], so they share the session
//! refresh protocol with proxied traffic.

pub mod models;

pub use models::{AccessControl, Door, Place, PlacesResponse, SubscriberPlace};

use async_trait::async_trait;
use domru_auth::{AuthorizedClient, UpstreamRequest};
use domru_types::{GatewayError, Result};
use reqwest::Url;
use serde_json::json;
use std::sync::Arc;

/// Default upstream API origin.
pub const DEFAULT_BASE_URL: &str = "https://myhome.proptech.ru";

pub const PLACES_PATH: &str = "/rest/v1/subscriberplaces";

/// Action name understood by the access-control actions endpoint.
const OPEN_ACTION: &str = "accessControlOpen";

/// `/rest/v1/places/{place}/accesscontrols/{ac}/actions`
#[must_use]
pub fn open_door_path(place_id: i64, access_control_id: i64) -> String {
    format!("/rest/v1/places/{place_id}/accesscontrols/{access_control_id}/actions")
}

/// `/rest/v1/places/{place}/accesscontrols/{ac}/videosnapshots`
#[must_use]
pub fn snapshot_path(place_id: i64, access_control_id: i64) -> String {
    format!("/rest/v1/places/{place_id}/accesscontrols/{access_control_id}/videosnapshots")
}

/// Door operations the MQTT bridge depends on.
#[async_trait]
pub trait DoorApi: Send + Sync {
    /// Every door visible to the current subscriber.
    async fn doors(&self) -> Result<Vec<Door>>;

    /// Trigger the open action of one door.
    async fn open_door(&self, place_id: i64, access_control_id: i64) -> Result<()>;
}

/// Upstream API client.
#[derive(Clone)]
pub struct DomruApi {
    client: Arc<AuthorizedClient>,
    base: Url,
}

impl DomruApi {
    #[must_use]
    pub fn new(client: Arc<AuthorizedClient>, base: Url) -> Self {
        Self { client, base }
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| GatewayError::Config(format!("upstream url {path}: {e}")))
    }

    /// Fetch the subscriber's places with their access controls.
    ///
    /// # Errors
    ///
    /// Propagates [`AuthorizedClient`] failures; `Upstream` on non-2xx.
    pub async fn places(&self) -> Result<PlacesResponse> {
        let request = UpstreamRequest::get(self.url(PLACES_PATH)?);
        self.client.execute_json(request).await
    }
}

#[async_trait]
impl DoorApi for DomruApi {
    async fn doors(&self) -> Result<Vec<Door>> {
        let doors = self.places().await?.doors();
        tracing::debug!(count = doors.len(), "fetched doors");
        Ok(doors)
    }

    async fn open_door(&self, place_id: i64, access_control_id: i64) -> Result<()> {
        let request = UpstreamRequest::post(self.url(&open_door_path(place_id, access_control_id))?)
            .with_json(&json!({ "name": OPEN_ACTION }))?;
        self.client.execute_checked(request).await?;
        tracing::info!(place_id, access_control_id, "door opened");
        Ok(())
    }
}
