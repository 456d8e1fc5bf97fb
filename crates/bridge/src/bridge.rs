//! Door entities mirrored onto the message bus.
//!
//! Each door is a `lock` entity with optimistic local state: `UNLOCKED` is
//! published once the upstream open action succeeds, and `LOCKED` again after
//! the relock delay, mirroring the hardware's automatic relock.

use crate::{
    bus::{BusMessage, MessageBus},
    discovery::LockDiscovery,
    topics::{
        AVAILABILITY_TOPIC, DoorKey, LockCommand, OFFLINE, STATE_LOCKED, STATE_UNLOCKED,
        parse_command_topic,
    },
};
use domru_api::DoorApi;
use domru_types::{GatewayError, Result};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Pause between bridge start and discovery.
    pub settle_delay: Duration,
    /// Time after a successful open until `LOCKED` is published again.
    pub relock_delay: Duration,
    /// Gateway base URL reachable by Home Assistant, for entity pictures.
    pub picture_base: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            relock_delay: Duration::from_secs(5),
            picture_base: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

impl LockState {
    fn payload(self) -> &'static str {
        match self {
            Self::Locked => STATE_LOCKED,
            Self::Unlocked => STATE_UNLOCKED,
        }
    }
}

#[derive(Default)]
struct DoorSlot {
    state: Option<LockState>,
    /// Cancels the pending relock of the previous unlock.
    relock: Option<CancellationToken>,
}

pub struct DeviceBridge {
    api: Arc<dyn DoorApi>,
    bus: Arc<dyn MessageBus>,
    settings: BridgeSettings,
    doors: Mutex<HashMap<DoorKey, DoorSlot>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl DeviceBridge {
    #[must_use]
    pub fn new(
        api: Arc<dyn DoorApi>,
        bus: Arc<dyn MessageBus>,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            bus,
            settings,
            doors: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Current optimistic state of `key`, if it has been published.
    #[must_use]
    pub fn state(&self, key: DoorKey) -> Option<LockState> {
        self.doors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .and_then(|slot| slot.state)
    }

    /// Publish discovery and an initial `LOCKED` for every upstream door.
    ///
    /// Returns the number of doors announced.
    ///
    /// # Errors
    ///
    /// Fails if the door list cannot be fetched. Per-door publish failures are
    /// logged and skipped.
    pub async fn discover(&self) -> Result<usize> {
        let doors = self.api.doors().await?;
        let picture_base = self.settings.picture_base.as_deref();
        let mut announced = 0;
        for door in &doors {
            let key = DoorKey::new(door.access_control_id, door.place_id);
            tracing::info!(
                place_id = door.place_id,
                access_control_id = door.access_control_id,
                name = %door.display_name,
                "discovered door"
            );
            let config = LockDiscovery::for_door(door, picture_base);
            let published = match config.to_payload() {
                Ok(payload) => self.bus.publish(&key.discovery_topic(), payload, true).await,
                Err(e) => Err(e),
            };
            if let Err(e) = published {
                tracing::error!(entity = %key.entity_id(), error = %e, "publish discovery");
                continue;
            }
            self.cancel_relock(key);
            if let Err(e) = self.publish_state(key, LockState::Locked).await {
                tracing::error!(entity = %key.entity_id(), error = %e, "publish initial state");
                continue;
            }
            announced += 1;
        }
        Ok(announced)
    }

    /// Handle one inbound command message.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::MalformedTopic`] for topics outside the naming scheme.
    /// - [`GatewayError::Bus`] for unknown payloads or publish failures.
    /// - The upstream error if the door could not be opened; state is unchanged.
    /// - [`GatewayError::Bus`] if the bridge shuts down while the door is opening.
    pub async fn handle_command(self: &Arc<Self>, topic: &str, payload: &[u8]) -> Result<()> {
        let key = parse_command_topic(topic)?;
        let command = LockCommand::parse(payload).ok_or_else(|| {
            GatewayError::Bus(format!(
                "unsupported command payload {:?} on {topic}",
                String::from_utf8_lossy(payload)
            ))
        })?;

        match command {
            LockCommand::Lock => {
                self.cancel_relock(key);
                self.publish_state(key, LockState::Locked).await
            }
            LockCommand::Unlock => {
                tracing::info!(
                    place_id = key.place_id,
                    access_control_id = key.access_control_id,
                    "opening door"
                );
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        return Err(GatewayError::Bus("bridge stopped before the door opened".into()));
                    }
                    opened = self.api.open_door(key.place_id, key.access_control_id) => opened?,
                }
                self.cancel_relock(key);
                self.publish_state(key, LockState::Unlocked).await?;
                self.schedule_relock(key);
                Ok(())
            }
        }
    }

    /// Settle, discover once, then serve commands until shut down or the
    /// command stream ends.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<BusMessage>) {
        let discovery = Arc::clone(&self);
        self.tasks.spawn(async move {
            tokio::select! {
                () = discovery.cancel.cancelled() => return,
                () = tokio::time::sleep(discovery.settings.settle_delay) => {}
            }
            match discovery.discover().await {
                Ok(n) => tracing::info!(doors = n, "discovery complete"),
                Err(e) => tracing::error!(error = %e, "door discovery failed"),
            }
        });

        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => break,
                m = commands.recv() => match m {
                    Some(m) => m,
                    None => break,
                },
            };
            tracing::debug!(topic = %message.topic, "received command");
            let bridge = Arc::clone(&self);
            self.tasks.spawn(async move {
                if let Err(e) = bridge.handle_command(&message.topic, &message.payload).await {
                    match e {
                        GatewayError::MalformedTopic(_) | GatewayError::Bus(_) => {
                            tracing::warn!(error = %e, "dropping command");
                        }
                        _ => tracing::error!(topic = %message.topic, error = %e, "command failed"),
                    }
                }
            });
        }
    }

    /// Cancel pending work, mark the bridge offline and disconnect.
    pub async fn shutdown(&self) {
        tracing::info!("stopping device bridge");
        self.cancel.cancel();
        self.tasks.close();
        if tokio::time::timeout(crate::bus::DISCONNECT_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(pending = self.tasks.len(), "bridge tasks still running at shutdown");
        }

        let offline = self
            .bus
            .publish(AVAILABILITY_TOPIC, OFFLINE.as_bytes().to_vec(), true);
        match tokio::time::timeout(crate::bus::DISCONNECT_GRACE, offline).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "publish offline"),
            Err(_) => tracing::warn!("publish offline timed out"),
        }
        if let Err(e) = self.bus.disconnect().await {
            tracing::warn!(error = %e, "disconnect from broker");
        }
    }

    async fn publish_state(&self, key: DoorKey, state: LockState) -> Result<()> {
        self.bus
            .publish(&key.state_topic(), state.payload().as_bytes().to_vec(), true)
            .await?;
        self.slot(key, |slot| slot.state = Some(state));
        tracing::debug!(entity = %key.entity_id(), state = state.payload(), "published state");
        Ok(())
    }

    fn schedule_relock(self: &Arc<Self>, key: DoorKey) {
        let token = self.cancel.child_token();
        self.slot(key, |slot| slot.relock = Some(token.clone()));
        let bridge = Arc::clone(self);
        let delay = self.settings.relock_delay;
        self.tasks.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Err(e) = bridge.publish_state(key, LockState::Locked).await {
                        tracing::error!(entity = %key.entity_id(), error = %e, "publish relock");
                    }
                }
            }
        });
    }

    fn cancel_relock(&self, key: DoorKey) {
        self.slot(key, |slot| {
            if let Some(token) = slot.relock.take() {
                token.cancel();
            }
        });
    }

    fn slot(&self, key: DoorKey, f: impl FnOnce(&mut DoorSlot)) {
        let mut doors = self.doors.lock().unwrap_or_else(PoisonError::into_inner);
        f(doors.entry(key).or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domru_api::Door;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Published {
        topic: String,
        payload: String,
        retain: bool,
    }

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<Published>>,
        disconnected: Mutex<bool>,
    }

    impl RecordingBus {
        fn take(&self) -> Vec<Published> {
            std::mem::take(&mut *self.published.lock().unwrap())
        }

        fn len(&self) -> usize {
            self.published.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
            self.published.lock().unwrap().push(Published {
                topic: topic.to_owned(),
                payload: String::from_utf8(payload).unwrap(),
                retain,
            });
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            *self.disconnected.lock().unwrap() = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeApi {
        doors: Vec<Door>,
        opened: Mutex<Vec<(i64, i64)>>,
        fail_open: bool,
        open_delay: Option<Duration>,
    }

    #[async_trait]
    impl DoorApi for FakeApi {
        async fn doors(&self) -> Result<Vec<Door>> {
            Ok(self.doors.clone())
        }

        async fn open_door(&self, place_id: i64, access_control_id: i64) -> Result<()> {
            self.opened.lock().unwrap().push((place_id, access_control_id));
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_open {
                Err(GatewayError::Upstream {
                    status: 500,
                    body: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn doors() -> Vec<Door> {
        vec![
            Door {
                access_control_id: 7,
                place_id: 3,
                display_name: "Entrance".into(),
            },
            Door {
                access_control_id: 8,
                place_id: 3,
                display_name: "Gate".into(),
            },
        ]
    }

    fn setup(api: FakeApi) -> (Arc<DeviceBridge>, Arc<FakeApi>, Arc<RecordingBus>) {
        let api = Arc::new(api);
        let bus = Arc::new(RecordingBus::default());
        let bridge = DeviceBridge::new(api.clone(), bus.clone(), BridgeSettings::default());
        (bridge, api, bus)
    }

    fn state_msg(topic: &str, payload: &str) -> Published {
        Published {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_opens_then_relocks_in_order() {
        let (bridge, api, bus) = setup(FakeApi::default());
        let state_topic = "domru/domru-door_7_3-open/state";

        bridge
            .handle_command("domru/domru-door_7_3-open/command", b"UNLOCK")
            .await
            .unwrap();
        assert_eq!(*api.opened.lock().unwrap(), vec![(3, 7)]);
        assert_eq!(bus.len(), 1);
        assert_eq!(bridge.state(DoorKey::new(7, 3)), Some(LockState::Unlocked));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(bus.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            bus.take(),
            vec![
                state_msg(state_topic, "UNLOCKED"),
                state_msg(state_topic, "LOCKED"),
            ]
        );
        assert_eq!(bridge.state(DoorKey::new(7, 3)), Some(LockState::Locked));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_unlock_restarts_relock_timer() {
        let (bridge, api, bus) = setup(FakeApi::default());
        let topic = "domru/domru-door_7_3-open/command";

        bridge.handle_command(topic, b"UNLOCK").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        bridge.handle_command(topic, b"UNLOCK").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        // First relock was superseded by the second unlock.
        assert_eq!(bus.len(), 2);
        tokio::time::sleep(Duration::from_secs(3)).await;
        let payloads: Vec<String> = bus.take().into_iter().map(|p| p.payload).collect();
        assert_eq!(payloads, ["UNLOCKED", "UNLOCKED", "LOCKED"]);
        assert_eq!(api.opened.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_topic_has_no_effect() {
        let (bridge, api, bus) = setup(FakeApi::default());
        let err = bridge
            .handle_command("domru/domru-door:7:3-open/command", b"UNLOCK")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MalformedTopic(_)));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(api.opened.lock().unwrap().is_empty());
        assert_eq!(bus.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_payload_is_dropped() {
        let (bridge, api, bus) = setup(FakeApi::default());
        let err = bridge
            .handle_command("domru/domru-door_7_3-open/command", b"OPEN")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Bus(_)));
        assert!(api.opened.lock().unwrap().is_empty());
        assert_eq!(bus.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_publishes_without_upstream_call() {
        let (bridge, api, bus) = setup(FakeApi::default());
        bridge
            .handle_command("domru/domru-door_7_3-open/command", b"LOCK")
            .await
            .unwrap();
        assert!(api.opened.lock().unwrap().is_empty());
        assert_eq!(
            bus.take(),
            vec![state_msg("domru/domru-door_7_3-open/state", "LOCKED")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_leaves_state_untouched() {
        let (bridge, api, bus) = setup(FakeApi {
            fail_open: true,
            ..FakeApi::default()
        });
        let err = bridge
            .handle_command("domru/domru-door_7_3-open/command", b"UNLOCK")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: 500, .. }));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.opened.lock().unwrap().len(), 1);
        assert_eq!(bus.len(), 0);
        assert_eq!(bridge.state(DoorKey::new(7, 3)), None);
    }

    #[tokio::test]
    async fn test_discovery_is_byte_identical() {
        let (bridge, _, bus) = setup(FakeApi {
            doors: doors(),
            ..FakeApi::default()
        });
        assert_eq!(bridge.discover().await.unwrap(), 2);
        let first = bus.take();
        assert_eq!(bridge.discover().await.unwrap(), 2);
        let second = bus.take();

        assert_eq!(first, second);
        let topics: Vec<&str> = first.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(
            topics,
            [
                "homeassistant/lock/domru-door_7_3-open/config",
                "domru/domru-door_7_3-open/state",
                "homeassistant/lock/domru-door_8_3-open/config",
                "domru/domru-door_8_3-open/state",
            ]
        );
        assert!(first.iter().all(|p| p.retain));
        assert_eq!(first[1].payload, "LOCKED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_discovers_after_settle_and_serves_commands() {
        let (bridge, api, bus) = setup(FakeApi {
            doors: doors(),
            ..FakeApi::default()
        });
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn(Arc::clone(&bridge).run(rx));

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(bus.len(), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(bus.take().len(), 4);

        tx.send(BusMessage {
            topic: "domru/domru-door_8_3-open/command".into(),
            payload: "UNLOCK".into(),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*api.opened.lock().unwrap(), vec![(3, 8)]);

        // Shutdown cancels the pending relock.
        bridge.shutdown().await;
        runner.await.unwrap();
        let after: Vec<Published> = bus.take();
        assert_eq!(
            after,
            vec![
                state_msg("domru/domru-door_8_3-open/state", "UNLOCKED"),
                state_msg(AVAILABILITY_TOPIC, OFFLINE),
            ]
        );
        assert!(*bus.disconnected.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_does_not_wait_for_slow_open() {
        let (bridge, api, bus) = setup(FakeApi {
            open_delay: Some(Duration::from_secs(165)),
            ..FakeApi::default()
        });
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn(Arc::clone(&bridge).run(rx));

        tx.send(BusMessage {
            topic: "domru/domru-door_7_3-open/command".into(),
            payload: "UNLOCK".into(),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.opened.lock().unwrap().len(), 1);

        let started = tokio::time::Instant::now();
        bridge.shutdown().await;
        runner.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());

        assert_eq!(bus.take(), vec![state_msg(AVAILABILITY_TOPIC, OFFLINE)]);
        assert_eq!(bridge.state(DoorKey::new(7, 3)), None);
        assert!(*bus.disconnected.lock().unwrap());
    }
}
