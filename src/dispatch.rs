//! Two-phase notification dispatch.
//!
//! Every inbound frame first runs through the base phase, which publishes the
//! raw payload and handles battery, icon and device-info records shared by
//! all tag variants. Frames tagged as variant frames then run through the
//! connected variant's own parser.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{instrument, trace};

use crate::codec::{FrameCodec, NotificationRecord};
use crate::event::TagEvent;
use crate::streams::{DeviceInfoUpdate, TagStreams};
use crate::variant::TagVariant;

/// Routes inbound frames to the shared streams.
#[derive(Debug)]
pub(crate) struct NotificationDispatcher {
    variant: TagVariant,
    streams: Arc<TagStreams>,
    device_info_gate: Mutex<Option<oneshot::Sender<DeviceInfoUpdate>>>,
}

impl NotificationDispatcher {
    pub(crate) fn new(variant: TagVariant, streams: Arc<TagStreams>) -> Self {
        Self {
            variant,
            streams,
            device_info_gate: Mutex::new(None),
        }
    }

    /// Arms a one-shot gate resolved by the next device-info frame.
    ///
    /// Replaces any previously armed gate, dropping its sender so a stale
    /// waiter observes a closed channel rather than an old frame.
    pub(crate) fn arm_device_info_gate(&self) -> oneshot::Receiver<DeviceInfoUpdate> {
        let (tx, rx) = oneshot::channel();
        *self
            .device_info_gate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Runs one frame through both dispatch phases.
    #[instrument(skip(self, payload), level = "trace", fields(payload_len = payload.len()))]
    pub(crate) fn dispatch(&self, payload: &[u8]) {
        self.streams.publish_raw(payload.to_vec());
        self.dispatch_base(payload);
        self.dispatch_variant(payload);
    }

    fn dispatch_base(&self, payload: &[u8]) {
        match FrameCodec::decode_notification(payload) {
            NotificationRecord::Battery { percent } => {
                self.streams.publish_battery(Some(percent));
            }
            NotificationRecord::IconPressed => {
                self.streams.publish_event(TagEvent::IconPressed);
            }
            NotificationRecord::DeviceInfo { firmware, percent } => {
                self.streams.publish_battery(Some(percent));
                let update = DeviceInfoUpdate { firmware };
                self.streams.publish_device_info(update.clone());
                let gate = self
                    .device_info_gate
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .take();
                if let Some(gate) = gate {
                    // Receiver may already have timed out; that is fine.
                    let _ = gate.send(update);
                }
            }
            NotificationRecord::Variant | NotificationRecord::Unrecognised => {}
        }
    }

    fn dispatch_variant(&self, payload: &[u8]) {
        if payload.first() != Some(&0x01) {
            return;
        }
        match self.variant.parse_notification(payload) {
            Some(event) => self.streams.publish_event(event),
            None => {
                trace!(
                    variant = %self.variant,
                    "variant frame did not parse to an event"
                );
            }
        }
    }
}
