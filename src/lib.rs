mod app;
mod cli;
mod codec;
mod commands;
mod controller;
mod device;
mod dispatch;
mod error;
mod event;
mod protocol;
mod streams;
mod telemetry;
mod transport;
mod utils;
mod variant;

pub use app::{fake_transport, real_transport, run};
pub use cli::{Args, Command, ListenArgs, OutputFormat, SendArgs};
pub use codec::{FrameCodec, NotificationRecord};
pub use commands::{
    GpioSettings, LedColor, LedCommand, LedPattern, MotionSettings, RAW_ANALOG_INPUT_REQUEST,
    RAW_POWER_OFF, RAW_STATUS_ALL_OFF, RAW_STATUS_OFF, RAW_STATUS_ON,
};
pub use controller::ConnectionController;
pub use device::{DeviceMetadata, TagDevice};
pub use error::{CommandError, FixtureError, InteractionError, ProtocolError};
pub use event::{ButtonKind, MotionState, Orientation, TagEvent};
pub use protocol::{CMD_FEATURE_ENABLE, EndpointId};
pub use streams::{DeviceInfoUpdate, TagStreams};
pub use transport::{
    BtleTransport, DiscoveryEvent, DiscoveryPort, FakeTransport, FakeTransportConfig, HexPayload,
    Notification, NotificationPayloads, RecordedWrite, SubscribeMode, Transport, TransportSession,
    WriteMode,
};
pub use variant::{TagVariant, VariantSettings};
