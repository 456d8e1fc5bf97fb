//! Message bus seam and its MQTT implementation.

use crate::topics::{AVAILABILITY_TOPIC, COMMAND_SUBSCRIPTION, OFFLINE, ONLINE};
use async_trait::async_trait;
use bytes::Bytes;
use domru_types::{GatewayError, Result};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Time allowed for queued publishes and the disconnect to reach the broker.
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Outbound side of the bus used by the bridge.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish at QoS 1.
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

    /// Flush and close the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl MqttSettings {
    #[must_use]
    pub fn from_config(host: String, config: &domru_config::MqttConfig) -> Self {
        Self {
            host,
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    fn options(&self) -> MqttOptions {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let mut options = MqttOptions::new(format!("domru_proxy_{stamp}"), &self.host, self.port);
        options
            .set_credentials(&self.username, &self.password)
            .set_keep_alive(KEEP_ALIVE)
            .set_last_will(LastWill::new(
                AVAILABILITY_TOPIC,
                OFFLINE,
                QoS::AtLeastOnce,
                true,
            ));
        options
    }
}

/// [`MessageBus`] over a `rumqttc` client whose event loop runs in its own task.
pub struct MqttBus {
    client: AsyncClient,
    event_loop: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl MqttBus {
    /// Start the connection. Commands arriving on [`COMMAND_SUBSCRIPTION`]
    /// are delivered on the returned receiver.
    #[must_use]
    pub fn connect(settings: &MqttSettings) -> (Self, mpsc::Receiver<BusMessage>) {
        let (client, event_loop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        let cancel = CancellationToken::new();

        tracing::info!(host = %settings.host, port = settings.port, "connecting to MQTT broker");
        let handle = tokio::spawn(drive(client.clone(), event_loop, tx, cancel.clone()));
        let bus = Self {
            client,
            event_loop: tokio::sync::Mutex::new(Some(handle)),
            cancel,
        };
        (bus, rx)
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| GatewayError::Bus(format!("publish {topic}: {e}")))
    }

    async fn disconnect(&self) -> Result<()> {
        let result = self
            .client
            .try_disconnect()
            .map_err(|e| GatewayError::Bus(format!("disconnect: {e}")));

        if let Some(mut handle) = self.event_loop.lock().await.take()
            && (result.is_err()
                || tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                    .await
                    .is_err())
        {
            tracing::debug!("MQTT event loop did not finish within grace period");
            self.cancel.cancel();
            handle.abort();
        }
        result
    }
}

/// Poll the event loop until the client disconnects or `cancel` fires.
async fn drive(
    client: AsyncClient,
    mut event_loop: EventLoop,
    commands: mpsc::Sender<BusMessage>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("connected to MQTT broker");
                // The request queue is drained by this very loop, so never block on it here.
                if let Err(e) = client.try_subscribe(COMMAND_SUBSCRIPTION, QoS::AtLeastOnce) {
                    tracing::error!(error = %e, "subscribe to command topic");
                } else {
                    tracing::info!(topic = COMMAND_SUBSCRIPTION, "subscribed to command topic");
                }
                if let Err(e) =
                    client.try_publish(AVAILABILITY_TOPIC, QoS::AtLeastOnce, true, ONLINE)
                {
                    tracing::error!(error = %e, "publish availability");
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let message = BusMessage {
                    topic: p.topic,
                    payload: p.payload,
                };
                if commands.try_send(message).is_err() {
                    tracing::warn!("command queue full or closed, dropping message");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("disconnected from MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection lost");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}
