use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    DiscoveryEvent, DiscoveryPort, Notification, SubscribeMode, Transport, TransportSession,
    WriteMode,
};
use crate::error::{FixtureError, InteractionError};
use crate::protocol::{CMD_FEATURE_ENABLE, EndpointId};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Device-info frame the fake indicates by default: firmware 1.0.0, 100 %.
const DEFAULT_DEVICE_INFO_FRAME: [u8; 16] = [
    0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0A,
    0x00,
];

/// Parsed fake hex payload.
#[derive(Debug, Clone, derive_more::Into)]
pub struct HexPayload {
    payload: Vec<u8>,
}

impl FromStr for HexPayload {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payload = parse_hex(value)?;
        Ok(Self { payload })
    }
}

/// Parsed fake notification payload fixtures.
#[derive(Debug, Clone, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = parse_notifications(value)?;
        Ok(Self { payloads })
    }
}

/// Settings for constructing a fake transport.
#[derive(Debug, Builder)]
pub struct FakeTransportConfig {
    /// Device-info frame indicated after the indicate subscription.
    device_info_frame: Option<HexPayload>,
    /// Never indicate device info, forcing the handshake timeout.
    #[builder(default)]
    withhold_device_info: bool,
    /// Frames pushed through the notify endpoint once it is subscribed.
    scripted_notifications: Option<NotificationPayloads>,
    /// Never acknowledge the feature-enable write.
    #[builder(default)]
    stall_enable_ack: bool,
    /// Fail every connect attempt.
    #[builder(default)]
    fail_connect: bool,
    /// Fail every write with a scripted error.
    #[builder(default)]
    fail_writes: bool,
    /// Reachability reported to discovery watchers.
    #[builder(default = true)]
    connectable: bool,
    /// Artificial delay before the first discovery sighting.
    #[builder(default)]
    discovery_delay: Duration,
}

/// One write captured by the fake transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordedWrite {
    pub endpoint: EndpointId,
    pub payload: Vec<u8>,
    pub mode: WriteMode,
}

#[derive(Debug, Default)]
struct Shared {
    writes: Mutex<Vec<RecordedWrite>>,
    notify_tx: Mutex<Option<mpsc::Sender<Notification>>>,
    discovery_tx: Mutex<Option<mpsc::Sender<DiscoveryEvent>>>,
    session_token: Mutex<Option<CancellationToken>>,
    link_up: AtomicBool,
    connect_attempts: AtomicUsize,
}

/// Scripted transport used in tests and non-hardware environments.
#[derive(Debug)]
pub struct FakeTransport {
    device_info_frame: Option<Vec<u8>>,
    scripted_notifications: Vec<Vec<u8>>,
    stall_enable_ack: bool,
    fail_connect: bool,
    fail_writes: bool,
    connectable: bool,
    discovery_delay: Duration,
    shared: Arc<Shared>,
}

impl FakeTransport {
    /// Creates a fake transport from explicit settings.
    pub fn new(config: FakeTransportConfig) -> Self {
        let device_info_frame = if config.withhold_device_info {
            None
        } else {
            Some(
                config
                    .device_info_frame
                    .map_or_else(|| DEFAULT_DEVICE_INFO_FRAME.to_vec(), Into::into),
            )
        };

        Self {
            device_info_frame,
            scripted_notifications: config.scripted_notifications.map(Into::into).unwrap_or_default(),
            stall_enable_ack: config.stall_enable_ack,
            fail_connect: config.fail_connect,
            fail_writes: config.fail_writes,
            connectable: config.connectable,
            discovery_delay: config.discovery_delay,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Returns every write captured so far, oldest first.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.shared
            .writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns how many connect attempts have been made.
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Reports whether a session link is currently up.
    pub fn link_up(&self) -> bool {
        self.shared.link_up.load(Ordering::SeqCst)
    }

    /// Pushes one frame through the current session's notification channel.
    pub fn push_notification(&self, endpoint: EndpointId, payload: Vec<u8>) {
        self.shared.push_notification(endpoint, payload);
    }

    /// Drops the current session link, as an out-of-band disconnection would.
    pub fn trigger_disconnect(&self) {
        self.shared.link_up.store(false, Ordering::SeqCst);
        let token = self
            .shared
            .session_token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Re-reports the device to any active discovery watcher.
    pub fn report_sighting(&self) {
        let guard = self
            .shared
            .discovery_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sender) = guard.as_ref() {
            let _ = sender.try_send(DiscoveryEvent {
                connectable: self.connectable,
            });
        }
    }
}

impl Shared {
    fn push_notification(&self, endpoint: EndpointId, payload: Vec<u8>) {
        let guard = self
            .notify_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sender) = guard.as_ref() {
            let _ = sender.try_send(Notification { endpoint, payload });
        }
    }

    fn record_write(&self, endpoint: EndpointId, payload: &[u8], mode: WriteMode) {
        self.writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedWrite {
                endpoint,
                payload: payload.to_vec(),
                mode,
            });
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _address: &str) -> Result<Arc<dyn TransportSession>, InteractionError> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(InteractionError::ScriptedConnectFailure);
        }

        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        *self
            .shared
            .notify_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tx);
        *self
            .shared
            .session_token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(token.clone());
        self.shared.link_up.store(true, Ordering::SeqCst);

        Ok(Arc::new(FakeSession {
            device_info_frame: self.device_info_frame.clone(),
            scripted_notifications: self.scripted_notifications.clone(),
            stall_enable_ack: self.stall_enable_ack,
            fail_writes: self.fail_writes,
            shared: Arc::clone(&self.shared),
            receiver: Mutex::new(Some(rx)),
            token,
        }))
    }
}

#[async_trait]
impl DiscoveryPort for FakeTransport {
    async fn watch(
        &self,
        _address: &str,
    ) -> Result<mpsc::Receiver<DiscoveryEvent>, InteractionError> {
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        if !self.discovery_delay.is_zero() {
            tokio::time::sleep(self.discovery_delay).await;
        }
        let _ = tx.try_send(DiscoveryEvent {
            connectable: self.connectable,
        });
        *self
            .shared
            .discovery_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }
}

#[derive(Debug)]
struct FakeSession {
    device_info_frame: Option<Vec<u8>>,
    scripted_notifications: Vec<Vec<u8>>,
    stall_enable_ack: bool,
    fail_writes: bool,
    shared: Arc<Shared>,
    receiver: Mutex<Option<mpsc::Receiver<Notification>>>,
    token: CancellationToken,
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn subscribe(
        &self,
        endpoint: EndpointId,
        mode: SubscribeMode,
    ) -> Result<(), InteractionError> {
        match (endpoint, mode) {
            (EndpointId::Indicate, _) => {
                if let Some(frame) = &self.device_info_frame {
                    self.shared.push_notification(EndpointId::Indicate, frame.clone());
                }
            }
            (EndpointId::Notify, _) => {
                for payload in &self.scripted_notifications {
                    self.shared.push_notification(EndpointId::Notify, payload.clone());
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        if self.fail_writes {
            return Err(InteractionError::ScriptedWriteFailure);
        }
        if self.stall_enable_ack
            && mode == WriteMode::WithResponse
            && payload == CMD_FEATURE_ENABLE
        {
            // Ack never arrives; the caller's timeout is expected to fire.
            std::future::pending::<()>().await;
        }
        self.shared.record_write(endpoint, payload, mode);
        Ok(())
    }

    async fn notifications(&self) -> Result<mpsc::Receiver<Notification>, InteractionError> {
        self.receiver
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .ok_or(InteractionError::SessionGone)
    }

    async fn is_connected(&self) -> bool {
        self.shared.link_up.load(Ordering::SeqCst)
    }

    fn disconnected(&self) -> CancellationToken {
        self.token.clone()
    }

    async fn close(&self) -> Result<(), InteractionError> {
        self.shared.link_up.store(false, Ordering::SeqCst);
        self.token.cancel();
        Ok(())
    }
}

fn parse_notifications(raw_value: &str) -> Result<Vec<Vec<u8>>, FixtureError> {
    if raw_value.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw_value.split(',').map(parse_hex).collect()
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).map_err(|error| match error {
        hex::FromHexError::InvalidHexCharacter { c, .. } => FixtureError::InvalidHexByte {
            value: c.to_string(),
        },
        hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
            FixtureError::InvalidHexLength
        }
    })
}
