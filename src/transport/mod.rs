//! Transport and discovery ports.
//!
//! The connection controller only ever talks to these traits; the btleplug
//! backend binds them to real hardware and the fake backend scripts them for
//! tests and demos.

mod btleplug_backend;
mod fake_backend;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::InteractionError;
use crate::protocol::EndpointId;

pub use self::btleplug_backend::BtleTransport;
pub use self::fake_backend::{
    FakeTransport, FakeTransportConfig, HexPayload, NotificationPayloads, RecordedWrite,
};

/// Whether a write requires a link-layer acknowledgement.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteMode {
    /// Write with acknowledgement.
    WithResponse,
    /// Fire-and-forget write.
    WithoutResponse,
}

/// Subscription semantics for a notification-capable endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SubscribeMode {
    /// Plain notifications.
    Notify,
    /// Request indications even when the endpoint also supports notify.
    ForceIndicate,
}

/// One raw frame received from a subscribed endpoint.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Notification {
    pub endpoint: EndpointId,
    pub payload: Vec<u8>,
}

/// A reachability report for a watched address.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DiscoveryEvent {
    pub connectable: bool,
}

/// Connection-oriented transport capable of opening sessions to tags.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a session to the device with the given address.
    async fn connect(&self, address: &str) -> Result<Arc<dyn TransportSession>, InteractionError>;
}

/// One live link to a connected tag.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Subscribes to a notification-capable endpoint.
    async fn subscribe(
        &self,
        endpoint: EndpointId,
        mode: SubscribeMode,
    ) -> Result<(), InteractionError>;

    /// Writes a complete frame to an endpoint.
    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError>;

    /// Takes the session's notification channel. Yields frames from every
    /// subscribed endpoint; may be taken at most once per session.
    async fn notifications(&self) -> Result<mpsc::Receiver<Notification>, InteractionError>;

    /// Reports whether the link is still up.
    async fn is_connected(&self) -> bool;

    /// Token cancelled when the transport reports a disconnection.
    fn disconnected(&self) -> CancellationToken;

    /// Releases the link. Idempotent.
    async fn close(&self) -> Result<(), InteractionError>;
}

/// Passive, address-filtered reachability watching.
#[async_trait]
pub trait DiscoveryPort: Send + Sync {
    /// Watches for the given address becoming reachable. The channel stays
    /// open for the watcher's lifetime and re-reports sightings, which lets a
    /// controller retry after a failed or closed session.
    async fn watch(
        &self,
        address: &str,
    ) -> Result<mpsc::Receiver<DiscoveryEvent>, InteractionError>;
}
