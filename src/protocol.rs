use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Logical endpoints exposed by a MESH tag.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// Characteristic used for command writes.
    #[strum(to_string = "write")]
    Write,
    /// Higher-frequency characteristic streaming sensor/event frames.
    #[strum(to_string = "notify")]
    Notify,
    /// Low-frequency characteristic delivering one-shot acknowledgements and
    /// identity frames.
    #[strum(to_string = "indicate")]
    Indicate,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: &'static str,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID.
    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }
}

/// Feature-enable command sent during the handshake.
///
/// This literal already embeds its trailing checksum byte and is written
/// as-is, never re-framed.
pub const CMD_FEATURE_ENABLE: [u8; 4] = [0x00, 0x02, 0x01, 0x03];

/// How long the controller waits for a device-info indication after connect.
pub(crate) const DEVICE_INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the controller waits for the feature-enable acknowledgement.
pub(crate) const ENABLE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoint metadata keyed by typed endpoint IDs.
pub(crate) static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> =
    LazyLock::new(|| {
        EndpointId::iter()
            .map(|endpoint| (endpoint, metadata_for(endpoint)))
            .collect()
    });

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

/// Resolves a characteristic UUID back to a typed endpoint.
pub(crate) fn endpoint_for_uuid(uuid: &str) -> Option<EndpointId> {
    EndpointId::iter()
        .find(|endpoint| endpoint_metadata(*endpoint).uuid().eq_ignore_ascii_case(uuid))
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::Write => EndpointMetadata {
            name: "MESH command write",
            uuid: "72c90004-57a9-4d40-b746-534e22ec9f9e",
        },
        EndpointId::Notify => EndpointMetadata {
            name: "MESH sensor notify",
            uuid: "72c90003-57a9-4d40-b746-534e22ec9f9e",
        },
        EndpointId::Indicate => EndpointMetadata {
            name: "MESH acknowledgement indicate",
            uuid: "72c90005-57a9-4d40-b746-534e22ec9f9e",
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn endpoint_metadata_contains_expected_uuids() {
        let write = endpoint_metadata(EndpointId::Write);
        assert_eq!("72c90004-57a9-4d40-b746-534e22ec9f9e", write.uuid());

        let indicate = endpoint_metadata(EndpointId::Indicate);
        assert_eq!("MESH acknowledgement indicate", indicate.name());
    }

    #[test]
    fn endpoint_for_uuid_is_case_insensitive() {
        let resolved = endpoint_for_uuid("72C90003-57A9-4D40-B746-534E22EC9F9E");
        assert_eq!(Some(EndpointId::Notify), resolved);
    }

    #[test]
    fn feature_enable_literal_embeds_its_checksum() {
        let (tail, head) = CMD_FEATURE_ENABLE
            .split_last()
            .expect("literal is non-empty");
        let sum: u8 = head.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
        assert_eq!(sum, *tail);
    }
}
