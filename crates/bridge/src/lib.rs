//! MQTT control plane for Home Assistant.
//!
//! Discovered doors are announced as `lock` entities; `UNLOCK` commands open
//! the door through the upstream API.

pub mod bridge;
pub mod bus;
pub mod discovery;
pub mod supervisor;
pub mod topics;

pub use bridge::{BridgeSettings, DeviceBridge, LockState};
pub use bus::{BusMessage, MessageBus, MqttBus, MqttSettings};
pub use topics::{DoorKey, parse_command_topic};

use domru_api::DoorApi;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running bridge and the task serving its commands.
pub struct BridgeHandle {
    bridge: Arc<DeviceBridge>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Connect to the broker and start the bridge in the background.
    #[must_use]
    pub fn spawn(api: Arc<dyn DoorApi>, mqtt: &MqttSettings, settings: BridgeSettings) -> Self {
        let (bus, commands) = MqttBus::connect(mqtt);
        let bridge = DeviceBridge::new(api, Arc::new(bus), settings);
        let task = tokio::spawn(Arc::clone(&bridge).run(commands));
        Self { bridge, task }
    }

    /// Shut the bridge down and wait for its command loop to exit.
    pub async fn stop(self) {
        self.bridge.shutdown().await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "bridge task ended abnormally");
        }
    }
}
