use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::transport::{FakeTransportConfig, HexPayload, NotificationPayloads};

/// Command-line options for the MESH tag tool.
#[derive(Debug, Parser)]
#[command(name = "meshtag", about = "Interact with Sony MESH BLE sensor tags.")]
pub struct Args {
    /// Uses the fake transport with scripted payloads instead of real BLE.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake device-info frame as hexadecimal bytes.
    #[arg(long, global = true, requires = "fake")]
    fake_device_info: Option<HexPayload>,
    /// Fake sensor frames as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Withholds the fake device-info indication to exercise the handshake
    /// timeout.
    #[arg(long, global = true, requires = "fake")]
    fake_withhold_device_info: bool,
    /// Artificial fake discovery delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Explicitly requested output format, if any.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed arguments into the command and optional fake settings.
    #[must_use]
    pub fn into_command_and_fake_config(self) -> (Command, Option<FakeTransportConfig>) {
        let Args {
            fake,
            fake_device_info,
            fake_notifications,
            fake_withhold_device_info,
            fake_discovery_delay,
            output: _,
            command,
        } = self;

        let fake_config = fake.then(|| {
            FakeTransportConfig::builder()
                .maybe_device_info_frame(fake_device_info)
                .maybe_scripted_notifications(fake_notifications)
                .withhold_device_info(fake_withhold_device_info)
                .discovery_delay(fake_discovery_delay.unwrap_or(Duration::ZERO))
                .build()
        });
        (command, fake_config)
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to a tag when it appears and stream its events and telemetry.
    Listen(ListenArgs),
    /// Connect to a tag and write one command payload.
    Send(SendArgs),
}

/// Arguments for the `listen` command.
#[derive(Debug, clap::Args)]
pub struct ListenArgs {
    /// BLE address of the tag.
    pub address: String,
    /// Advertised local name, e.g. `MESH-100BU1234567`.
    pub name: String,
    /// Stop after this many sensor events.
    #[arg(long)]
    pub max_events: Option<usize>,
}

/// Arguments for the `send` command.
#[derive(Debug, clap::Args)]
pub struct SendArgs {
    /// BLE address of the tag.
    pub address: String,
    /// Advertised local name, e.g. `MESH-100LE1234567`.
    pub name: String,
    /// Command payload as hexadecimal bytes.
    pub payload: HexPayload,
    /// Write the payload as-is instead of framing it with a checksum.
    #[arg(long)]
    pub raw: bool,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

/// Terminal output rendering.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn listen_parses_identity_and_limit() {
        let args = Args::try_parse_from([
            "meshtag",
            "listen",
            "AA:BB:CC:DD:EE:FF",
            "MESH-100BU1234567",
            "--max-events",
            "5",
        ])
        .expect("valid listen arguments should parse");

        let (command, fake_config) = args.into_command_and_fake_config();
        assert!(fake_config.is_none());
        assert_matches!(command, Command::Listen(listen) => {
            assert_eq!("AA:BB:CC:DD:EE:FF", listen.address);
            assert_eq!(Some(5), listen.max_events);
        });
    }

    #[test]
    fn fake_fixture_flags_require_fake_mode() {
        let result = Args::try_parse_from([
            "meshtag",
            "--fake-notifications",
            "010002",
            "listen",
            "AA:BB",
            "MESH-100BU1",
        ]);

        let error = result.expect_err("fake payload flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn send_parses_hex_payloads() {
        let args = Args::try_parse_from([
            "meshtag",
            "send",
            "AA:BB:CC:DD:EE:FF",
            "MESH-100LE1234567",
            "00040004",
            "--raw",
        ])
        .expect("valid send arguments should parse");

        let (command, _) = args.into_command_and_fake_config();
        assert_matches!(command, Command::Send(send) => {
            assert_eq!(vec![0x00, 0x04, 0x00, 0x04], Vec::<u8>::from(send.payload));
            assert!(send.raw);
        });
    }

    #[test]
    fn rejects_invalid_hex_payloads() {
        let result = Args::try_parse_from([
            "meshtag",
            "send",
            "AA:BB:CC:DD:EE:FF",
            "MESH-100LE1234567",
            "0xZZ",
        ]);

        assert_matches!(result, Err(_));
    }
}
