use serde::Serialize;
use serde_with::SerializeDisplay;

/// Recognised press kinds for the Button tag.
///
/// The wire protocol only defines codes 1-3; anything else is surfaced as
/// [`ButtonKind::Unknown`] instead of being dropped, so consumers can log
/// firmware surprises.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, SerializeDisplay)]
pub enum ButtonKind {
    #[display("single")]
    Single,
    #[display("long")]
    Long,
    #[display("double")]
    Double,
    #[display("unknown({_0})")]
    Unknown(u8),
}

impl From<u8> for ButtonKind {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Single,
            2 => Self::Long,
            3 => Self::Double,
            other => Self::Unknown(other),
        }
    }
}

/// Motion detector state reported by the Motion tag.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, SerializeDisplay)]
pub enum MotionState {
    #[display("detected")]
    Detected,
    #[display("clear")]
    Clear,
    #[display("unknown")]
    Unknown,
}

/// Resting orientation reported by the Accelerometer tag.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, SerializeDisplay)]
pub enum Orientation {
    #[display("left")]
    Left,
    #[display("bottom")]
    Bottom,
    #[display("front")]
    Front,
    #[display("back")]
    Back,
    #[display("top")]
    Top,
    #[display("right")]
    Right,
}

impl Orientation {
    /// Maps the raw orientation byte, `None` for undefined codes.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Left),
            2 => Some(Self::Bottom),
            3 => Some(Self::Front),
            4 => Some(Self::Back),
            5 => Some(Self::Top),
            6 => Some(Self::Right),
            _ => None,
        }
    }
}

/// Domain events decoded from notification frames.
///
/// One-shot notifications, never persisted by the core. Consumers that need
/// device identity attach it from the emitting [`crate::TagDevice`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TagEvent {
    /// The tag's physical icon was pressed.
    IconPressed,
    /// The Button tag's main switch was pressed.
    ButtonPressed { kind: ButtonKind },
    /// The Accelerometer tag was flipped.
    Flip,
    /// The Accelerometer tag settled into a new orientation.
    Orientation { orientation: Orientation },
    /// The Motion tag changed detection state.
    Motion { state: MotionState },
    /// A monitored GPIO digital input changed level.
    DigitalInput { pin: u8, high: bool },
    /// A GPIO analog input reading, already scaled to volts.
    AnalogInput { volts: f32 },
    /// An Ambient tag reading.
    Ambient { illuminance: u32, proximity: u16 },
    /// A Temperature/Humidity tag reading.
    Environment { temperature: f32, humidity: u16 },
}
