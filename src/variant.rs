use serde_with::SerializeDisplay;

use crate::commands::{
    GpioSettings, MotionSettings, ambient_enable_payload, environment_enable_payload,
};
use crate::event::{ButtonKind, MotionState, Orientation, TagEvent};

/// Device variant, selected once at setup from the advertised name prefix.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, SerializeDisplay)]
pub enum TagVariant {
    /// MESH-100AC move/flip sensor.
    #[display("accelerometer")]
    Accelerometer,
    /// MESH-100BU push button.
    #[display("button")]
    Button,
    /// MESH-100GP general-purpose I/O.
    #[display("gpio")]
    Gpio,
    /// MESH-100MD motion detector.
    #[display("motion")]
    Motion,
    /// MESH-100PA light and proximity sensor.
    #[display("ambient")]
    Ambient,
    /// MESH-100TH temperature and humidity sensor.
    #[display("environment")]
    Environment,
    /// Fallback for unrecognised prefixes (covers MESH-100LE, which needs no
    /// connect hook or extra parsing).
    #[display("generic")]
    Generic,
}

/// Per-session mutable variant configuration.
///
/// Only the variant's own slice is ever consulted, but keeping both here lets
/// the controller hold one lock regardless of variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariantSettings {
    pub gpio: GpioSettings,
    pub motion: MotionSettings,
}

impl TagVariant {
    /// Resolves a variant from the advertised local name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("MESH-100AC") {
            Self::Accelerometer
        } else if name.starts_with("MESH-100BU") {
            Self::Button
        } else if name.starts_with("MESH-100GP") {
            Self::Gpio
        } else if name.starts_with("MESH-100MD") {
            Self::Motion
        } else if name.starts_with("MESH-100PA") {
            Self::Ambient
        } else if name.starts_with("MESH-100TH") {
            Self::Environment
        } else {
            Self::Generic
        }
    }

    /// Configuration payloads sent once during the variant handshake, in
    /// order. Each is checksum-framed by the controller before writing.
    #[must_use]
    pub fn connected_payloads(self, settings: &VariantSettings) -> Vec<Vec<u8>> {
        match self {
            Self::Gpio => vec![settings.gpio.config_payload().to_vec()],
            Self::Motion => vec![settings.motion.config_payload(true).to_vec()],
            Self::Ambient => vec![ambient_enable_payload().to_vec()],
            Self::Environment => vec![environment_enable_payload().to_vec()],
            Self::Accelerometer | Self::Button | Self::Generic => Vec::new(),
        }
    }

    /// Interprets one variant frame (leading byte `1`).
    ///
    /// Frames for other variants, short buffers, and undefined codes yield
    /// `None`; the wire protocol has no strict schema guarantee across
    /// firmware revisions, so nothing here is an error.
    #[must_use]
    pub fn parse_notification(self, payload: &[u8]) -> Option<TagEvent> {
        if payload.first() != Some(&0x01) {
            return None;
        }

        match self {
            Self::Accelerometer => match payload.get(1)? {
                0x02 => Some(TagEvent::Flip),
                0x03 => Orientation::from_code(*payload.get(2)?)
                    .map(|orientation| TagEvent::Orientation { orientation }),
                _ => None,
            },
            Self::Button => match payload.get(1)? {
                0x00 => Some(TagEvent::ButtonPressed {
                    kind: ButtonKind::from(*payload.get(2)?),
                }),
                _ => None,
            },
            Self::Gpio => match payload.get(1)? {
                0x00 | 0x02 => Some(TagEvent::DigitalInput {
                    pin: *payload.get(2)?,
                    high: *payload.get(3)? == 1,
                }),
                0x01 => Some(TagEvent::AnalogInput {
                    volts: scale_analog(*payload.get(5)?),
                }),
                0x03 => Some(TagEvent::AnalogInput {
                    volts: scale_analog(*payload.get(4)?),
                }),
                _ => None,
            },
            Self::Motion => match payload.get(1)? {
                0x00 => {
                    let state = match payload.get(3)? {
                        1 => MotionState::Detected,
                        2 => MotionState::Clear,
                        _ => MotionState::Unknown,
                    };
                    Some(TagEvent::Motion { state })
                }
                _ => None,
            },
            Self::Ambient => match payload.get(1)? {
                0x00 if payload.len() >= 8 => Some(TagEvent::Ambient {
                    illuminance: u32::from(u16::from_le_bytes([payload[6], payload[7]])) * 10,
                    proximity: u16::from_le_bytes([payload[4], payload[5]]),
                }),
                _ => None,
            },
            Self::Environment => match payload.get(1)? {
                0x00 if payload.len() >= 8 => Some(TagEvent::Environment {
                    temperature: f32::from(i16::from_le_bytes([payload[4], payload[5]])) / 10.0,
                    humidity: u16::from_le_bytes([payload[6], payload[7]]),
                }),
                _ => None,
            },
            Self::Generic => None,
        }
    }
}

fn scale_analog(raw: u8) -> f32 {
    (f32::from(raw) * 3.0 / 255.0 * 100.0).round() / 100.0
}
