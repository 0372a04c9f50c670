//! Per-device connection lifecycle.
//!
//! A controller owns at most one session task at a time. Discovery reports
//! trigger a connection attempt unless one is already running; the session
//! task performs the device-info and feature-enable handshake, then parks
//! until the link drops or the controller is closed. Whatever way a session
//! ends, its cleanup resets connectivity and battery exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::FrameCodec;
use crate::commands::{
    self, LedCommand, RAW_ANALOG_INPUT_REQUEST, RAW_POWER_OFF, RAW_STATUS_ALL_OFF, RAW_STATUS_OFF,
    RAW_STATUS_ON,
};
use crate::dispatch::NotificationDispatcher;
use crate::error::{InteractionError, ProtocolError};
use crate::protocol::{
    CMD_FEATURE_ENABLE, DEVICE_INFO_TIMEOUT, ENABLE_ACK_TIMEOUT, EndpointId,
};
use crate::streams::TagStreams;
use crate::transport::{SubscribeMode, Transport, TransportSession, WriteMode};
use crate::variant::{TagVariant, VariantSettings};

/// Handle on the currently running session task.
#[derive(Debug)]
struct SessionHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

struct ControllerInner {
    transport: Arc<dyn Transport>,
    address: String,
    name: String,
    variant: TagVariant,
    settings: Mutex<VariantSettings>,
    streams: Arc<TagStreams>,
    dispatcher: NotificationDispatcher,
    session: Mutex<Option<SessionHandle>>,
    live: Mutex<Option<Arc<dyn TransportSession>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ControllerInner {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ControllerInner")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

/// Drives the connection lifecycle for one tag.
#[derive(Debug, Clone)]
pub struct ConnectionController {
    inner: Arc<ControllerInner>,
}

impl ConnectionController {
    /// Creates a controller for the named tag. The variant is derived from
    /// the advertised name.
    pub fn new(transport: Arc<dyn Transport>, address: &str, name: &str) -> Self {
        let variant = TagVariant::from_name(name);
        let streams = Arc::new(TagStreams::new());
        let dispatcher = NotificationDispatcher::new(variant, Arc::clone(&streams));
        Self {
            inner: Arc::new(ControllerInner {
                transport,
                address: address.to_string(),
                name: name.to_string(),
                variant,
                settings: Mutex::new(VariantSettings::default()),
                streams,
                dispatcher,
                session: Mutex::new(None),
                live: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The tag's advertised name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The tag's address.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// The variant derived from the tag's name.
    pub fn variant(&self) -> TagVariant {
        self.inner.variant
    }

    /// Shared streams for this tag.
    pub fn streams(&self) -> Arc<TagStreams> {
        Arc::clone(&self.inner.streams)
    }

    /// Snapshot of the current variant settings.
    pub fn settings(&self) -> VariantSettings {
        *self.inner.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reacts to a discovery report for this tag's address.
    ///
    /// Spawns a session attempt unless one is already running or the
    /// controller is closed. Repeated sightings while busy are no-ops.
    #[instrument(skip(self), level = "debug", fields(name = %self.inner.name, connectable))]
    pub fn on_discovered(&self, connectable: bool) {
        if !connectable {
            trace!("sighting is not connectable; ignoring");
            return;
        }
        let mut slot = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Checked under the slot lock: close() raises the flag before taking
        // the slot, so a racing sighting either sees it here or stores its
        // handle early enough for close() to cancel it.
        if self.inner.closed.load(Ordering::SeqCst) {
            trace!("controller is closed; ignoring sighting");
            return;
        }
        if let Some(handle) = slot.as_ref()
            && !handle.task.is_finished()
        {
            debug!("session attempt already in flight");
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session(Arc::clone(&self.inner), cancel.clone()));
        *slot = Some(SessionHandle { task, cancel });
    }

    /// Shuts the controller down, ending any running session.
    ///
    /// Waits for the session task so streams are reset before returning.
    /// Idempotent.
    #[instrument(skip(self), level = "debug", fields(name = %self.inner.name))]
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let handle = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(error) = handle.task.await {
                debug!(%error, "session task ended abnormally");
            }
        }
    }

    fn live_session(&self) -> Result<Arc<dyn TransportSession>, InteractionError> {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| InteractionError::NotConnected {
                name: self.inner.name.clone(),
            })
    }

    /// Writes a complete pre-framed payload as-is.
    #[instrument(skip(self, payload), level = "debug", fields(name = %self.inner.name, payload_len = payload.len()))]
    pub async fn send_raw(&self, payload: &[u8]) -> Result<(), InteractionError> {
        let session = self.live_session()?;
        session
            .write(EndpointId::Write, payload, WriteMode::WithResponse)
            .await
    }

    /// Frames a payload with its checksum and writes it.
    #[instrument(skip(self, payload), level = "debug", fields(name = %self.inner.name, payload_len = payload.len()))]
    pub async fn send_command(&self, payload: &[u8]) -> Result<(), InteractionError> {
        let session = self.live_session()?;
        let frame = FrameCodec::encode_command(payload);
        session
            .write(EndpointId::Write, &frame, WriteMode::WithResponse)
            .await
    }

    /// Lights the chosen status LED channels steadily.
    pub async fn set_status_led(
        &self,
        red: bool,
        green: bool,
        blue: bool,
    ) -> Result<(), InteractionError> {
        self.send_command(&commands::status_channels_payload(red, green, blue))
            .await
    }

    /// Restores the default status LED behaviour.
    pub async fn status_led_default(&self) -> Result<(), InteractionError> {
        self.send_raw(&RAW_STATUS_ON).await
    }

    /// Turns the status LED off.
    pub async fn status_led_off(&self) -> Result<(), InteractionError> {
        self.send_raw(&RAW_STATUS_OFF).await
    }

    /// Turns every status indicator off.
    pub async fn status_all_off(&self) -> Result<(), InteractionError> {
        self.send_raw(&RAW_STATUS_ALL_OFF).await
    }

    /// Powers the tag down.
    pub async fn power_off(&self) -> Result<(), InteractionError> {
        self.send_raw(&RAW_POWER_OFF).await
    }

    /// Runs an LED pattern on an LED tag.
    pub async fn set_led(&self, command: &LedCommand) -> Result<(), InteractionError> {
        self.send_command(&command.payload()).await
    }

    /// Turns an LED tag's output off.
    pub async fn led_off(&self) -> Result<(), InteractionError> {
        self.send_command(&LedCommand::off_payload()).await
    }

    /// Requests a one-shot analog input reading from a GPIO tag.
    pub async fn request_analog_input(&self) -> Result<(), InteractionError> {
        self.send_raw(&RAW_ANALOG_INPUT_REQUEST).await
    }

    /// Sets one digital output pin and pushes the new GPIO configuration.
    pub async fn set_digital_output(&self, pin: u8, on: bool) -> Result<(), ProtocolError> {
        let payload = {
            let mut settings = self
                .inner
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            settings.gpio.set_digital_output(pin, on)?;
            settings.gpio.config_payload()
        };
        self.send_command(&payload).await?;
        Ok(())
    }

    /// Sets the analog (PWM) output level and pushes the new configuration.
    pub async fn set_analog_output(&self, level: u8) -> Result<(), InteractionError> {
        let payload = {
            let mut settings = self
                .inner
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            settings.gpio.set_analog_output(level);
            settings.gpio.config_payload()
        };
        self.send_command(&payload).await
    }

    /// Switches VOUT power and pushes the new configuration.
    pub async fn set_power_output(&self, on: bool) -> Result<(), InteractionError> {
        let payload = {
            let mut settings = self
                .inner
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            settings.gpio.set_power_output(on);
            settings.gpio.config_payload()
        };
        self.send_command(&payload).await
    }

    /// Enables or disables continuous analog input reporting.
    pub async fn set_analog_input(&self, enabled: bool) -> Result<(), InteractionError> {
        let payload = {
            let mut settings = self
                .inner
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            settings.gpio.set_analog_input(enabled);
            settings.gpio.config_payload()
        };
        self.send_command(&payload).await
    }

    /// Updates the motion hold time and pushes the new configuration.
    pub async fn set_motion_hold_ms(&self, hold_ms: u16) -> Result<(), ProtocolError> {
        let payload = {
            let mut settings = self
                .inner
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            settings.motion.set_hold_ms(hold_ms)?;
            settings.motion.config_payload(false)
        };
        self.send_command(&payload).await?;
        Ok(())
    }

    /// Updates the motion detection delay and pushes the new configuration.
    pub async fn set_motion_delay_ms(&self, delay_ms: u16) -> Result<(), ProtocolError> {
        let payload = {
            let mut settings = self
                .inner
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            settings.motion.set_delay_ms(delay_ms)?;
            settings.motion.config_payload(false)
        };
        self.send_command(&payload).await?;
        Ok(())
    }
}

/// One full session attempt, from connect to cleanup.
#[instrument(skip(inner, cancel), level = "debug", fields(name = %inner.name, address = %inner.address))]
async fn run_session(inner: Arc<ControllerInner>, cancel: CancellationToken) {
    let session = tokio::select! {
        () = cancel.cancelled() => {
            debug!("session cancelled before connecting");
            cleanup(&inner);
            return;
        }
        result = inner.transport.connect(&inner.address) => match result {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "connect attempt failed");
                cleanup(&inner);
                return;
            }
        }
    };

    let pump = match start_notification_pump(&inner, session.as_ref()).await {
        Ok(pump) => pump,
        Err(error) => {
            warn!(%error, "failed to take the notification channel");
            close_quietly(session.as_ref()).await;
            cleanup(&inner);
            return;
        }
    };

    let handshake_result = tokio::select! {
        () = cancel.cancelled() => Err(InteractionError::Cancelled),
        result = handshake(&inner, session.as_ref()) => result,
    };
    if let Err(error) = handshake_result {
        warn!(%error, "handshake failed");
        close_quietly(session.as_ref()).await;
        pump.abort();
        cleanup(&inner);
        return;
    }

    *inner.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&session));
    inner.streams.publish_connectivity(true);
    info!("tag connected");

    let disconnected = session.disconnected();
    tokio::select! {
        () = cancel.cancelled() => {
            debug!("session cancelled");
            close_quietly(session.as_ref()).await;
        }
        () = disconnected.cancelled() => {
            info!("link lost");
        }
    }

    pump.abort();
    cleanup(&inner);
}

/// Forwards every inbound frame into the dispatcher.
async fn start_notification_pump(
    inner: &Arc<ControllerInner>,
    session: &dyn TransportSession,
) -> Result<JoinHandle<()>, InteractionError> {
    let mut notifications = session.notifications().await?;
    let inner = Arc::clone(inner);
    Ok(tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            inner.dispatcher.dispatch(&notification.payload);
        }
        trace!("notification channel closed");
    }))
}

/// Device-info and feature-enable handshake, then variant setup.
async fn handshake(
    inner: &ControllerInner,
    session: &dyn TransportSession,
) -> Result<(), InteractionError> {
    // Arm the gate before subscribing; the device-info indication can land
    // immediately after the subscription is acknowledged.
    let gate = inner.dispatcher.arm_device_info_gate();
    session
        .subscribe(EndpointId::Indicate, SubscribeMode::ForceIndicate)
        .await?;
    let update = timeout(DEVICE_INFO_TIMEOUT, gate)
        .await
        .map_err(|_elapsed| InteractionError::DeviceInfoTimeout {
            timeout: DEVICE_INFO_TIMEOUT,
        })?
        .map_err(|_recv_error| InteractionError::SessionGone)?;
    debug!(firmware = %update.firmware, "device info received");

    session
        .subscribe(EndpointId::Notify, SubscribeMode::Notify)
        .await?;

    timeout(
        ENABLE_ACK_TIMEOUT,
        session.write(EndpointId::Write, &CMD_FEATURE_ENABLE, WriteMode::WithResponse),
    )
    .await
    .map_err(|_elapsed| InteractionError::EnableAckTimeout {
        timeout: ENABLE_ACK_TIMEOUT,
    })??;

    let payloads = {
        let settings = inner.settings.lock().unwrap_or_else(PoisonError::into_inner);
        inner.variant.connected_payloads(&settings)
    };
    for payload in payloads {
        let frame = FrameCodec::encode_command(&payload);
        session
            .write(EndpointId::Write, &frame, WriteMode::WithResponse)
            .await?;
    }

    if !session.is_connected().await {
        return Err(InteractionError::NotConnected {
            name: inner.name.clone(),
        });
    }
    Ok(())
}

fn cleanup(inner: &ControllerInner) {
    *inner.live.lock().unwrap_or_else(PoisonError::into_inner) = None;
    // Order matters for consumers that treat connectivity as the gate for
    // the other streams: connectivity drops first, then battery resets.
    inner.streams.publish_connectivity(false);
    inner.streams.publish_battery(None);
}

async fn close_quietly(session: &dyn TransportSession) {
    if let Err(error) = session.close().await {
        debug!(%error, "failed to close session cleanly");
    }
}
