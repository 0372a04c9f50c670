use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use crate::event::TagEvent;

const RAW_STREAM_CAPACITY: usize = 64;
const EVENT_STREAM_CAPACITY: usize = 64;

/// Identity data parsed from the first device-info indication of a session.
///
/// Published on a replay-last stream so registry collaborators can upsert
/// their records without the dispatcher ever touching an ambient registry.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceInfoUpdate {
    /// Dotted firmware version string.
    pub firmware: String,
}

/// Output streams owned by a device, outliving individual sessions.
///
/// `battery`, `connectivity`, and `device_info` replay their latest value to
/// each new subscriber (`tokio::sync::watch`); `raw` and `events` fan out
/// without replay (`tokio::sync::broadcast`).
#[derive(Debug)]
pub struct TagStreams {
    battery_tx: watch::Sender<Option<u8>>,
    connectivity_tx: watch::Sender<bool>,
    device_info_tx: watch::Sender<Option<DeviceInfoUpdate>>,
    raw_tx: broadcast::Sender<Vec<u8>>,
    events_tx: broadcast::Sender<TagEvent>,
}

impl Default for TagStreams {
    fn default() -> Self {
        Self::new()
    }
}

impl TagStreams {
    /// Creates the stream set in its initial state: battery unset,
    /// connectivity false, no device info.
    #[must_use]
    pub fn new() -> Self {
        let (battery_tx, _) = watch::channel(None);
        let (connectivity_tx, _) = watch::channel(false);
        let (device_info_tx, _) = watch::channel(None);
        let (raw_tx, _) = broadcast::channel(RAW_STREAM_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_STREAM_CAPACITY);
        Self {
            battery_tx,
            connectivity_tx,
            device_info_tx,
            raw_tx,
            events_tx,
        }
    }

    /// Battery percentage stream; replays the current value on subscribe.
    #[must_use]
    pub fn battery(&self) -> watch::Receiver<Option<u8>> {
        self.battery_tx.subscribe()
    }

    /// Connectivity stream; replays the current value on subscribe.
    #[must_use]
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity_tx.subscribe()
    }

    /// Device-info stream; replays the current value on subscribe.
    #[must_use]
    pub fn device_info(&self) -> watch::Receiver<Option<DeviceInfoUpdate>> {
        self.device_info_tx.subscribe()
    }

    /// Raw received bytes; forwards only frames emitted after attachment.
    #[must_use]
    pub fn raw(&self) -> broadcast::Receiver<Vec<u8>> {
        self.raw_tx.subscribe()
    }

    /// Typed domain events; forwards only events emitted after attachment.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<TagEvent> {
        self.events_tx.subscribe()
    }

    /// Battery stream as a `Stream` adapter; yields the current value first.
    #[must_use]
    pub fn battery_stream(&self) -> WatchStream<Option<u8>> {
        WatchStream::new(self.battery_tx.subscribe())
    }

    /// Event stream as a `Stream` adapter for `StreamExt` consumers.
    #[must_use]
    pub fn event_stream(&self) -> BroadcastStream<TagEvent> {
        BroadcastStream::new(self.events_tx.subscribe())
    }

    /// Raw-byte stream as a `Stream` adapter for `StreamExt` consumers.
    #[must_use]
    pub fn raw_stream(&self) -> BroadcastStream<Vec<u8>> {
        BroadcastStream::new(self.raw_tx.subscribe())
    }

    pub(crate) fn publish_battery(&self, percent: Option<u8>) {
        self.battery_tx.send_replace(percent);
    }

    pub(crate) fn publish_connectivity(&self, connected: bool) {
        self.connectivity_tx.send_replace(connected);
    }

    pub(crate) fn publish_device_info(&self, update: DeviceInfoUpdate) {
        self.device_info_tx.send_replace(Some(update));
    }

    pub(crate) fn publish_raw(&self, payload: Vec<u8>) {
        // Send fails only when nobody is listening, which is fine for fan-out.
        let _ = self.raw_tx.send(payload);
    }

    pub(crate) fn publish_event(&self, event: TagEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn replay_streams_start_unset_and_disconnected() {
        let streams = TagStreams::new();
        assert_eq!(None, *streams.battery().borrow());
        assert_eq!(false, *streams.connectivity().borrow());
        assert_eq!(None, *streams.device_info().borrow());
    }

    #[test]
    fn replay_streams_deliver_current_value_to_late_subscribers() {
        let streams = TagStreams::new();
        streams.publish_battery(Some(80));
        streams.publish_connectivity(true);

        assert_eq!(Some(80), *streams.battery().borrow());
        assert_eq!(true, *streams.connectivity().borrow());
    }

    #[tokio::test]
    async fn raw_stream_has_no_replay() {
        let streams = TagStreams::new();
        {
            let _early = streams.raw();
            streams.publish_raw(vec![0x00, 0x01]);
        }

        let mut late = streams.raw();
        streams.publish_raw(vec![0x00, 0x02]);
        let received = late.recv().await.expect("raw frame should arrive");
        assert_eq!(vec![0x00, 0x02], received);
    }

    #[tokio::test]
    async fn stream_adapters_yield_published_values() {
        use tokio_stream::StreamExt;

        let streams = TagStreams::new();
        streams.publish_battery(Some(40));
        let mut battery = streams.battery_stream();
        let mut events = streams.event_stream();

        streams.publish_event(TagEvent::Flip);

        assert_eq!(Some(Some(40)), battery.next().await);
        assert_eq!(
            TagEvent::Flip,
            events
                .next()
                .await
                .expect("stream should stay open")
                .expect("event should not lag")
        );
    }

    #[tokio::test]
    async fn event_stream_fans_out_to_all_subscribers() {
        let streams = TagStreams::new();
        let mut first = streams.events();
        let mut second = streams.events();

        streams.publish_event(TagEvent::IconPressed);

        assert_eq!(
            TagEvent::IconPressed,
            first.recv().await.expect("first subscriber should receive")
        );
        assert_eq!(
            TagEvent::IconPressed,
            second
                .recv()
                .await
                .expect("second subscriber should receive")
        );
    }
}
