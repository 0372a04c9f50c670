use tracing::instrument;

/// Parsed view of one raw notification frame.
///
/// Generic frames carry a 2-byte type prefix. Anything that is neither a
/// generic frame nor long enough to parse is preserved untouched; tags across
/// firmware revisions emit frames this core does not know about and they must
/// never be treated as errors.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NotificationRecord {
    /// `00 00`: battery-only report.
    Battery { percent: u8 },
    /// `00 01`: the tag's physical icon was pressed.
    IconPressed,
    /// `00 02`: identity frame carrying firmware version and battery level.
    DeviceInfo { firmware: String, percent: u8 },
    /// Leading byte `1`: variant/sensor frame, interpreted per device variant.
    Variant,
    /// Anything else, passed through unparsed.
    Unrecognised,
}

/// Encodes and decodes MESH command and notification frames.
pub struct FrameCodec;

impl FrameCodec {
    /// Appends the 8-bit truncated sum of `payload` as a trailing checksum.
    ///
    /// ```
    /// use meshtag::FrameCodec;
    ///
    /// assert_eq!(vec![0x00, 0x05, 0x00, 0x05], FrameCodec::encode_command(&[0x00, 0x05, 0x00]));
    /// ```
    #[must_use]
    pub fn encode_command(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(Self::checksum(payload));
        frame
    }

    /// Computes the 8-bit truncated sum of `payload`.
    #[must_use]
    pub fn checksum(payload: &[u8]) -> u8 {
        payload.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
    }

    /// Decodes one raw notification frame into a tagged record.
    ///
    /// Unknown prefixes and short buffers come back as
    /// [`NotificationRecord::Unrecognised`]; decoding never fails.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    #[must_use]
    pub fn decode_notification(payload: &[u8]) -> NotificationRecord {
        match payload {
            [0x00, 0x00, rest @ ..] => match rest.first() {
                Some(level) => NotificationRecord::Battery {
                    percent: level.saturating_mul(10),
                },
                None => NotificationRecord::Unrecognised,
            },
            [0x00, 0x01, ..] => NotificationRecord::IconPressed,
            [0x00, 0x02, ..] if payload.len() > 14 => NotificationRecord::DeviceInfo {
                firmware: dotted_version(&payload[7..10]),
                percent: payload[14].saturating_mul(10),
            },
            [0x01, ..] => NotificationRecord::Variant,
            _ => NotificationRecord::Unrecognised,
        }
    }
}

fn dotted_version(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(&[0x01], vec![0x01, 0x01])]
    #[case(&[0x00, 0x05, 0x00], vec![0x00, 0x05, 0x00, 0x05])]
    #[case(&[0xFF, 0xFF], vec![0xFF, 0xFF, 0xFE])]
    fn encode_command_appends_truncated_sum(#[case] payload: &[u8], #[case] expected: Vec<u8>) {
        assert_eq!(expected, FrameCodec::encode_command(payload));
    }

    #[test]
    fn encode_command_preserves_payload_prefix() {
        let payload = [0x12, 0x34, 0x56, 0x78, 0x9A];
        let frame = FrameCodec::encode_command(&payload);
        assert_eq!(&payload, &frame[..frame.len() - 1]);
        assert_eq!(
            FrameCodec::checksum(&frame[..frame.len() - 1]),
            frame[frame.len() - 1]
        );
    }

    #[test]
    fn decode_battery_scales_to_percent() {
        let record = FrameCodec::decode_notification(&[0x00, 0x00, 0x07]);
        assert_eq!(NotificationRecord::Battery { percent: 70 }, record);
    }

    #[test]
    fn decode_icon_press() {
        let record = FrameCodec::decode_notification(&[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(NotificationRecord::IconPressed, record);
    }

    #[test]
    fn decode_device_info_extracts_firmware_and_battery() {
        let mut payload = vec![0x00, 0x02, 0, 0, 0, 0, 0, 1, 2, 5, 0, 0, 0, 0, 0x0A];
        payload.extend_from_slice(&[0, 0]);
        let record = FrameCodec::decode_notification(&payload);
        assert_eq!(
            NotificationRecord::DeviceInfo {
                firmware: "1.2.5".to_string(),
                percent: 100,
            },
            record
        );
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0x00])]
    #[case(&[0x00, 0x00])]
    #[case(&[0x00, 0x02, 0, 0, 0])]
    #[case(&[0x7F, 0x00, 0x01])]
    fn decode_tolerates_short_and_unknown_frames(#[case] payload: &[u8]) {
        assert_eq!(
            NotificationRecord::Unrecognised,
            FrameCodec::decode_notification(payload)
        );
    }

    #[test]
    fn decode_flags_variant_frames() {
        let record = FrameCodec::decode_notification(&[0x01, 0x00, 0x02, 0x01]);
        assert_eq!(NotificationRecord::Variant, record);
    }
}
