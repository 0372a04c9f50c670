use std::io;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, instrument};

use crate::cli::{Command, ListenArgs, OutputFormat, SendArgs};
use crate::device::TagDevice;
use crate::error::InteractionError;
use crate::event::TagEvent;
use crate::telemetry;
use crate::transport::{BtleTransport, DiscoveryPort, FakeTransport, FakeTransportConfig, Transport};
use crate::utils::format_hex;

const SERVICE_NAME: &str = "meshtag";

/// Creates a transport backed by the real BLE stack.
pub async fn real_transport() -> Result<Arc<BtleTransport>, InteractionError> {
    Ok(Arc::new(BtleTransport::new().await?))
}

/// Creates a transport backed by scripted fixtures.
#[must_use]
pub fn fake_transport(config: FakeTransportConfig) -> Arc<FakeTransport> {
    Arc::new(FakeTransport::new(config))
}

/// Runs one CLI command with injected transports.
///
/// # Errors
///
/// Returns an error if telemetry setup, discovery, or the command itself
/// fails.
pub async fn run(
    command: Command,
    output: &mut (dyn io::Write + Send),
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn DiscoveryPort>,
    output_format: OutputFormat,
) -> Result<()> {
    telemetry::initialise_tracing(SERVICE_NAME, output_format == OutputFormat::Pretty)
        .map_err(|error| anyhow!("{error}"))?;

    match command {
        Command::Listen(args) => listen(args, output, transport, discovery, output_format).await,
        Command::Send(args) => send(args, output, transport, discovery, output_format).await,
    }
}

/// Connects when the tag appears and streams its telemetry until stopped.
#[instrument(skip_all, level = "info", fields(address = %args.address, name = %args.name))]
async fn listen(
    args: ListenArgs,
    output: &mut (dyn io::Write + Send),
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn DiscoveryPort>,
    output_format: OutputFormat,
) -> Result<()> {
    let device = TagDevice::new(transport, &args.address, &args.name);
    let controller = device.controller().clone();
    let streams = device.streams();
    let mut events = streams.events();
    let mut battery = streams.battery();
    let mut connectivity = streams.connectivity();
    let mut device_info = streams.device_info();

    let discovery_task = drive_discovery(&device, discovery.watch(&args.address).await?);

    let mut received = 0usize;
    let outcome = loop {
        if let Some(limit) = args.max_events
            && received >= limit
        {
            break Ok(());
        }

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                break signal.map_err(|source| InteractionError::CtrlC { source }.into());
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let connected = *connectivity.borrow_and_update();
                report_connectivity(output, output_format, &device, connected)?;
            }
            changed = battery.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let percent = *battery.borrow_and_update();
                report_battery(output, output_format, percent)?;
            }
            changed = device_info.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let firmware = device_info
                    .borrow_and_update()
                    .as_ref()
                    .map(|info| info.firmware.clone());
                if let Some(firmware) = firmware {
                    report_firmware(output, output_format, &firmware)?;
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        received += 1;
                        report_event(output, output_format, &event)?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "event stream lagged");
                    }
                    Err(RecvError::Closed) => break Ok(()),
                }
            }
        }
    };

    discovery_task.abort();
    controller.close().await;
    outcome
}

/// Connects to the tag and writes one payload.
#[instrument(skip_all, level = "info", fields(address = %args.address, name = %args.name, raw = args.raw))]
async fn send(
    args: SendArgs,
    output: &mut (dyn io::Write + Send),
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn DiscoveryPort>,
    output_format: OutputFormat,
) -> Result<()> {
    let device = TagDevice::new(transport, &args.address, &args.name);
    let controller = device.controller().clone();
    let mut connectivity = device.streams().connectivity();

    let discovery_task = drive_discovery(&device, discovery.watch(&args.address).await?);

    let outcome = async {
        while !*connectivity.borrow_and_update() {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.map_err(|source| InteractionError::CtrlC { source })?;
                    return Err(InteractionError::Cancelled.into());
                }
                changed = connectivity.changed() => {
                    changed.map_err(|_closed| InteractionError::SessionGone)?;
                }
            }
        }

        let payload: Vec<u8> = args.payload.clone().into();
        if args.raw {
            controller.send_raw(&payload).await?;
        } else {
            controller.send_command(&payload).await?;
        }
        report_sent(output, output_format, &payload)?;
        anyhow::Ok(())
    }
    .await;

    discovery_task.abort();
    controller.close().await;
    outcome
}

/// Forwards discovery sightings into the device's controller.
fn drive_discovery(
    device: &TagDevice,
    mut sightings: tokio::sync::mpsc::Receiver<crate::transport::DiscoveryEvent>,
) -> tokio::task::JoinHandle<()> {
    let controller = device.controller().clone();
    tokio::spawn(async move {
        while let Some(sighting) = sightings.recv().await {
            controller.on_discovered(sighting.connectable);
        }
    })
}

fn report_connectivity(
    output: &mut (dyn io::Write + Send),
    output_format: OutputFormat,
    device: &TagDevice,
    connected: bool,
) -> Result<()> {
    match output_format {
        OutputFormat::Pretty => {
            if connected {
                writeln!(
                    output,
                    "{} {} ({})",
                    "connected".green().bold(),
                    device.name(),
                    device.model()
                )?;
            } else {
                writeln!(output, "{} {}", "disconnected".red().bold(), device.name())?;
            }
        }
        OutputFormat::Json => {
            let record = serde_json::json!({
                "record": "connectivity",
                "connected": connected,
                "device": device.metadata(),
            });
            writeln!(output, "{record}")?;
        }
    }
    Ok(())
}

fn report_battery(
    output: &mut (dyn io::Write + Send),
    output_format: OutputFormat,
    percent: Option<u8>,
) -> Result<()> {
    match output_format {
        OutputFormat::Pretty => match percent {
            Some(percent) => writeln!(output, "{} {percent}%", "battery".cyan())?,
            None => writeln!(output, "{} unknown", "battery".cyan())?,
        },
        OutputFormat::Json => {
            let record = serde_json::json!({ "record": "battery", "percent": percent });
            writeln!(output, "{record}")?;
        }
    }
    Ok(())
}

fn report_firmware(
    output: &mut (dyn io::Write + Send),
    output_format: OutputFormat,
    firmware: &str,
) -> Result<()> {
    match output_format {
        OutputFormat::Pretty => writeln!(output, "{} {firmware}", "firmware".cyan())?,
        OutputFormat::Json => {
            let record = serde_json::json!({ "record": "firmware", "version": firmware });
            writeln!(output, "{record}")?;
        }
    }
    Ok(())
}

fn report_event(
    output: &mut (dyn io::Write + Send),
    output_format: OutputFormat,
    event: &TagEvent,
) -> Result<()> {
    match output_format {
        OutputFormat::Pretty => {
            writeln!(output, "{} {}", "event".yellow().bold(), serde_json::to_string(event)?)?;
        }
        OutputFormat::Json => {
            let record = serde_json::json!({ "record": "event", "event": event });
            writeln!(output, "{record}")?;
        }
    }
    Ok(())
}

fn report_sent(
    output: &mut (dyn io::Write + Send),
    output_format: OutputFormat,
    payload: &[u8],
) -> Result<()> {
    match output_format {
        OutputFormat::Pretty => {
            writeln!(output, "{} {}", "sent".green().bold(), format_hex(payload))?;
        }
        OutputFormat::Json => {
            let record = serde_json::json!({
                "record": "sent",
                "payload": format_hex(payload),
            });
            writeln!(output, "{record}")?;
        }
    }
    Ok(())
}
