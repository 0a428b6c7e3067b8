//! XBee host binary.
//!
//! Opens the serial port the coordinator radio is attached to, reads the
//! coordinator's identity, discovers the mesh one or more times, and prints
//! what it found. Optionally sends a payload to every discovered device.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xbee_session::{CoordinatorConfig, SerialTransport, Transport, XBeeCoordinator};

mod config;
mod logging;
mod report;

use config::XbeeConfig;
use logging::XbeeLogFormatter;
use report::ScanReport;

/// How scan results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Discover and talk to an XBee mesh through its coordinator
#[derive(Parser, Debug)]
#[command(name = "xbee-host", version, about = "Discover and talk to an XBee mesh through its coordinator")]
struct Args {
    /// Serial device, e.g. /dev/ttyUSB0
    #[arg(long)]
    port: Option<String>,

    /// Serial bit rate
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Retries per request/response exchange
    #[arg(long)]
    retries: Option<u32>,

    /// Bound on one wait for a reply, e.g. 500ms
    #[arg(long)]
    read_timeout: Option<humantime::Duration>,

    /// Discovery window, e.g. 6s; read from the radio when unset
    #[arg(long)]
    discovery_window: Option<humantime::Duration>,

    /// Stop a scan after this many devices
    #[arg(long)]
    max_devices: Option<usize>,

    /// Read hardware and firmware versions of discovered devices
    #[arg(long)]
    query_versions: bool,

    /// Number of scans to run
    #[arg(long, default_value_t = 1)]
    scans: u32,

    /// Pause between scans
    #[arg(long, default_value = "10s")]
    rescan_interval: humantime::Duration,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Payload to send to every discovered device after each scan
    #[arg(long)]
    send: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "xbee.yaml")]
    config: PathBuf,
}

impl Args {
    /// Flags given on the command line win over file and environment
    fn apply_to(&self, config: &mut XbeeConfig) {
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(timeout) = self.read_timeout {
            config.read_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(window) = self.discovery_window {
            config.discovery_window_ms = Some(window.as_millis() as u64);
        }
        if let Some(max_devices) = self.max_devices {
            config.max_devices = Some(max_devices);
        }
        if self.query_versions {
            config.query_versions = true;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("xbee_host={}", args.log_level).parse()?)
        .add_directive(format!("xbee_session={}", args.log_level).parse()?)
        .add_directive(format!("xbee_topology={}", args.log_level).parse()?)
        .add_directive(format!("xbee_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(XbeeLogFormatter::new("xbee-host"))
        .init();

    info!("Starting XBee host v{}", env!("CARGO_PKG_VERSION"));

    let mut config = XbeeConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);
    config.validate()?;

    let transport = SerialTransport::open(&config.port, config.baud_rate)
        .with_context(|| format!("failed to open serial port {}", config.port))?;
    let coordinator_config = config.coordinator_config(CoordinatorConfig::default().discovery_window);
    let mut coordinator = XBeeCoordinator::connect(transport, coordinator_config)
        .context("failed to read coordinator identity")?;
    component_info!(
        "coordinator",
        "Connected to {} on {}",
        coordinator.identity(),
        coordinator.transport().path()
    );

    if config.discovery_window().is_none() {
        match coordinator.read_discovery_timeout() {
            Ok(radio_window) => {
                // leave room for the last reply to cross the serial link
                let window = radio_window + coordinator.config().read_timeout;
                coordinator.set_discovery_window(window);
                component_info!("scan", "Using discovery window of {} ms", window.as_millis());
            }
            Err(e) => {
                component_warn!("scan", "Could not read NT, keeping default window: {}", e);
            }
        }
    }

    let payload = args.send.as_ref().map(|text| Bytes::from(text.clone().into_bytes()));
    let rescan_interval: Duration = args.rescan_interval.into();

    for scan in 1..=args.scans {
        if scan > 1 {
            std::thread::sleep(rescan_interval);
        }

        match coordinator.scan_devices() {
            Ok(found) => component_info!("scan", "Scan {} found {} devices", scan, found),
            Err(e) => {
                component_warn!("scan", "Scan {} failed: {}", scan, e);
                continue;
            }
        }

        let report = ScanReport::new(scan, coordinator.identity(), coordinator.registry());
        match args.format {
            OutputFormat::Text => print!("{}", report.to_text()),
            OutputFormat::Json => println!("{}", report.to_json()?),
        }

        if let Some(payload) = &payload {
            send_to_all(&mut coordinator, payload);
        }
    }

    coordinator.close();
    info!("XBee host stopped");
    Ok(())
}

/// Transmit `payload` to every device of the last scan, logging each outcome
fn send_to_all<T: Transport>(coordinator: &mut XBeeCoordinator<T>, payload: &Bytes) -> usize {
    let devices = coordinator.connected_devices().to_vec();
    let mut delivered = 0;
    for device in &devices {
        match coordinator.transmit(device, payload.clone()) {
            Ok(status) => {
                delivered += 1;
                component_debug!(
                    "transmit",
                    "Delivered {} bytes to {} after {} retries",
                    payload.len(),
                    device.identity(),
                    status.retry_count
                );
            }
            Err(e) => component_error!("transmit", "Sending to {} failed: {}", device.identity(), e),
        }
    }
    component_info!("transmit", "Delivered to {}/{} devices", delivered, devices.len());
    delivered
}
