use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use strum::IntoEnumIterator;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use super::{
    DiscoveryEvent, DiscoveryPort, Notification, SubscribeMode, Transport, TransportSession,
    WriteMode,
};
use crate::error::InteractionError;
use crate::protocol::{self, EndpointId};

const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Transport backed by `btleplug`.
#[derive(Debug)]
pub struct BtleTransport {
    manager: Manager,
}

impl BtleTransport {
    /// Creates the real BLE transport.
    pub async fn new() -> Result<Self, InteractionError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<Adapter>, InteractionError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }
        Ok(adapters)
    }

    /// Looks up the peripheral with the given address on any adapter.
    #[instrument(skip(self), level = "debug", fields(address))]
    async fn find_peripheral(
        &self,
        address: &str,
    ) -> Result<(Adapter, Peripheral), InteractionError> {
        for adapter in self.adapters().await? {
            for peripheral in adapter.peripherals().await? {
                if peripheral_matches_address(&peripheral, address).await? {
                    return Ok((adapter, peripheral));
                }
            }
        }
        Err(InteractionError::PeripheralNotFound {
            address: address.to_string(),
        })
    }
}

async fn peripheral_matches_address(
    peripheral: &Peripheral,
    address: &str,
) -> Result<bool, InteractionError> {
    if addresses_match(&peripheral.id().to_string(), address) {
        return Ok(true);
    }
    let Some(properties) = peripheral.properties().await? else {
        return Ok(false);
    };
    Ok(addresses_match(&properties.address.to_string(), address))
}

fn addresses_match(candidate: &str, address: &str) -> bool {
    candidate.eq_ignore_ascii_case(address)
}

#[async_trait]
impl Transport for BtleTransport {
    #[instrument(skip(self), level = "debug", fields(address))]
    async fn connect(&self, address: &str) -> Result<Arc<dyn TransportSession>, InteractionError> {
        let (adapter, peripheral) = self.find_peripheral(address).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let characteristics = match characteristics_by_endpoint(&peripheral) {
            Ok(characteristics) => characteristics,
            Err(error) => {
                if let Err(disconnect_error) = peripheral.disconnect().await {
                    debug!(
                        error = ?disconnect_error,
                        "failed to disconnect after endpoint validation error"
                    );
                }
                return Err(error);
            }
        };

        info!(peripheral_id = %peripheral.id(), "connected to peripheral");

        let token = CancellationToken::new();
        spawn_disconnect_watcher(adapter, peripheral.id(), token.clone()).await?;

        Ok(Arc::new(BtleSession {
            peripheral,
            characteristics,
            token,
            notifications_taken: Mutex::new(false),
        }))
    }
}

#[async_trait]
impl DiscoveryPort for BtleTransport {
    #[instrument(skip(self), level = "debug", fields(address))]
    async fn watch(
        &self,
        address: &str,
    ) -> Result<mpsc::Receiver<DiscoveryEvent>, InteractionError> {
        let adapters = self.adapters().await?;
        for adapter in &adapters {
            adapter.start_scan(ScanFilter::default()).await?;
        }

        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let address = address.to_string();
        tokio::spawn(async move {
            loop {
                if tx.is_closed() {
                    break;
                }
                for adapter in &adapters {
                    let Ok(peripherals) = adapter.peripherals().await else {
                        continue;
                    };
                    for peripheral in peripherals {
                        let matches = peripheral_matches_address(&peripheral, &address)
                            .await
                            .unwrap_or(false);
                        if matches {
                            let _ = tx.try_send(DiscoveryEvent { connectable: true });
                        }
                    }
                }
                sleep(DISCOVERY_POLL_INTERVAL).await;
            }

            for adapter in &adapters {
                if let Err(error) = adapter.stop_scan().await {
                    debug!(?error, "failed to stop adapter scan cleanly");
                }
            }
        });

        Ok(rx)
    }
}

/// Cancels the token once the adapter reports the peripheral gone.
async fn spawn_disconnect_watcher(
    adapter: Adapter,
    peripheral_id: PeripheralId,
    token: CancellationToken,
) -> Result<(), InteractionError> {
    let mut events = adapter.events().await?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                maybe_event = events.next() => {
                    match maybe_event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                            debug!(peripheral_id = %id, "peripheral disconnected");
                            token.cancel();
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }
    });
    Ok(())
}

/// Active session bound to a real peripheral.
#[derive(Debug)]
struct BtleSession {
    peripheral: Peripheral,
    characteristics: HashMap<EndpointId, Characteristic>,
    token: CancellationToken,
    notifications_taken: Mutex<bool>,
}

impl BtleSession {
    fn characteristic_for(
        &self,
        endpoint: EndpointId,
    ) -> Result<&Characteristic, InteractionError> {
        self.characteristics
            .get(&endpoint)
            .ok_or(InteractionError::MissingEndpoint { endpoint })
    }
}

#[async_trait]
impl TransportSession for BtleSession {
    #[instrument(skip(self), level = "trace", fields(?endpoint, ?mode))]
    async fn subscribe(
        &self,
        endpoint: EndpointId,
        mode: SubscribeMode,
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        if mode == SubscribeMode::ForceIndicate
            && !characteristic.properties.contains(CharPropFlags::INDICATE)
        {
            trace!(?endpoint, "endpoint does not advertise indicate support");
        }
        self.peripheral.subscribe(characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self, payload), level = "trace", fields(?endpoint, ?mode, payload_len = payload.len()))]
    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(characteristic, payload, write_type)
            .await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<mpsc::Receiver<Notification>, InteractionError> {
        {
            let mut taken = self
                .notifications_taken
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *taken {
                return Err(InteractionError::SessionGone);
            }
            *taken = true;
        }

        let mut stream = self.peripheral.notifications().await?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    maybe_notification = stream.next() => {
                        let Some(notification) = maybe_notification else {
                            break;
                        };
                        let uuid = notification.uuid.to_string();
                        let Some(endpoint) = protocol::endpoint_for_uuid(&uuid) else {
                            trace!(%uuid, "dropping notification from unmapped characteristic");
                            continue;
                        };
                        if tx
                            .send(Notification {
                                endpoint,
                                payload: notification.value,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn disconnected(&self) -> CancellationToken {
        self.token.clone()
    }

    #[instrument(skip(self), level = "debug")]
    async fn close(&self) -> Result<(), InteractionError> {
        self.token.cancel();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

fn characteristics_by_endpoint(
    peripheral: &Peripheral,
) -> Result<HashMap<EndpointId, Characteristic>, InteractionError> {
    let mut characteristics = HashMap::new();
    for service in peripheral.services() {
        for characteristic in &service.characteristics {
            let uuid = characteristic.uuid.to_string();
            if let Some(endpoint) = protocol::endpoint_for_uuid(&uuid) {
                characteristics
                    .entry(endpoint)
                    .or_insert_with(|| characteristic.clone());
            }
        }
    }

    for endpoint in EndpointId::iter() {
        if !characteristics.contains_key(&endpoint) {
            return Err(InteractionError::MissingEndpoint { endpoint });
        }
    }
    Ok(characteristics)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("AA:BB:CC:DD:EE:FF", "aa:bb:cc:dd:ee:ff", true)]
    #[case("aa:bb:cc:dd:ee:ff", "AA:BB:CC:DD:EE:FF", true)]
    #[case("AA:BB:CC:DD:EE:FF", "AA:BB:CC:DD:EE:00", false)]
    fn addresses_match_ignores_case(
        #[case] candidate: &str,
        #[case] address: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, addresses_match(candidate, address));
    }
}
