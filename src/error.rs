use derive_more::From;
use thiserror::Error;

use crate::protocol::{EndpointId, endpoint_metadata};

/// Errors returned by transport and session operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no peripheral with address `{address}` is currently reachable")]
    PeripheralNotFound { address: String },
    #[error(
        "required endpoint `{name}` ({uuid}) was not found on the connected device",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { endpoint: EndpointId },
    #[error("`{name}` is not connected")]
    NotConnected { name: String },
    #[error("device info was not indicated within {timeout:?}")]
    DeviceInfoTimeout { timeout: std::time::Duration },
    #[error("feature-enable command was not acknowledged within {timeout:?}")]
    EnableAckTimeout { timeout: std::time::Duration },
    #[error("session was cancelled")]
    Cancelled,
    #[error("transport session is gone")]
    SessionGone,
    #[error("scripted write failure from the fake transport")]
    ScriptedWriteFailure,
    #[error("scripted connect failure from the fake transport")]
    ScriptedConnectFailure,
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Errors returned when parsing fake transport fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("hex payload length must be even")]
    InvalidHexLength,
    #[error("hex payload contains invalid byte `{value}`")]
    InvalidHexByte { value: String },
}

/// Errors returned when building typed command frames.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum CommandError {
    #[error("digital output pin {pin} is out of range; GPIO tags expose pins 1-3")]
    PinOutOfRange { pin: u8 },
    #[error("motion {field} time {value} ms is outside {min}-{max} ms")]
    MotionTimeOutOfRange {
        field: &'static str,
        value: u16,
        min: u16,
        max: u16,
    },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level protocol errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(CommandError, Box<CommandError>)]
    Command(Box<CommandError>),
    #[error(transparent)]
    #[from(InteractionError, Box<InteractionError>)]
    Interaction(Box<InteractionError>),
}
