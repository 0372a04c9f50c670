use std::sync::Arc;

use serde::Serialize;

use crate::controller::ConnectionController;
use crate::streams::TagStreams;
use crate::transport::Transport;
use crate::variant::TagVariant;

const MANUFACTURER: &str = "Sony";
const MODEL_PREFIX_LEN: usize = 10;

/// Identity metadata reported for one tag.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct DeviceMetadata {
    pub name: String,
    pub address: String,
    pub manufacturer: &'static str,
    pub model: String,
    pub variant: TagVariant,
    pub firmware: Option<String>,
}

/// One known tag: identity plus its connection lifecycle handle.
#[derive(Debug, Clone)]
pub struct TagDevice {
    controller: ConnectionController,
}

impl TagDevice {
    /// Creates a device from its advertised identity.
    pub fn new(transport: Arc<dyn Transport>, address: &str, name: &str) -> Self {
        Self {
            controller: ConnectionController::new(transport, address, name),
        }
    }

    pub fn name(&self) -> &str {
        self.controller.name()
    }

    pub fn address(&self) -> &str {
        self.controller.address()
    }

    pub fn variant(&self) -> TagVariant {
        self.controller.variant()
    }

    /// The model identifier: the family portion of the advertised name.
    ///
    /// `MESH-100BU1234567` reports model `MESH-100BU`.
    pub fn model(&self) -> &str {
        let name = self.controller.name();
        name.get(..MODEL_PREFIX_LEN).unwrap_or(name)
    }

    /// Firmware version, once a device-info frame has been observed.
    pub fn firmware(&self) -> Option<String> {
        self.controller
            .streams()
            .device_info()
            .borrow()
            .as_ref()
            .map(|info| info.firmware.clone())
    }

    /// Current identity snapshot.
    pub fn metadata(&self) -> DeviceMetadata {
        DeviceMetadata {
            name: self.name().to_string(),
            address: self.address().to_string(),
            manufacturer: MANUFACTURER,
            model: self.model().to_string(),
            variant: self.variant(),
            firmware: self.firmware(),
        }
    }

    pub fn streams(&self) -> Arc<TagStreams> {
        self.controller.streams()
    }

    pub fn controller(&self) -> &ConnectionController {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::{FakeTransport, FakeTransportConfig};

    fn device(name: &str) -> TagDevice {
        let transport = Arc::new(FakeTransport::new(FakeTransportConfig::builder().build()));
        TagDevice::new(transport, "AA:BB:CC:DD:EE:FF", name)
    }

    #[test]
    fn model_is_the_family_portion_of_the_name() {
        assert_eq!("MESH-100TH", device("MESH-100TH1234567").model());
        assert_eq!("MESH", device("MESH").model());
    }

    #[test]
    fn metadata_snapshot_reports_identity() {
        let metadata = device("MESH-100MD1234567").metadata();
        assert_eq!("Sony", metadata.manufacturer);
        assert_eq!("MESH-100MD", metadata.model);
        assert_matches!(metadata.variant, TagVariant::Motion);
        assert_eq!(None, metadata.firmware);
    }
}
