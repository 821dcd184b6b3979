use std::net::{IpAddr, SocketAddr};
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use chords_bridge::config::{BridgeConfig, DEFAULT_WS_PORT};
use chords_bridge::logging::init_logging;
use chords_bridge::protocol::{Command, BAUD_RATE};
use chords_bridge::serial::{list_ports, suggest_arduino, SerialConnector};
use chords_bridge::server::{self, AppState};
use chords_bridge::{Bridge, Hub};

#[derive(Parser, Debug)]
#[command(
    name = "chords-bridge",
    about = "Bridge an Arduino Chords board to WebSocket clients"
)]
struct Args {
    /// Log level (overrides CHORDS_LOG / RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the WebSocket bridge (default)
    Serve(ServeArgs),
    /// List serial ports and suggest the likely Arduino
    ListPorts,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Address to bind the WebSocket server to
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// WebSocket port
    #[arg(long, default_value_t = DEFAULT_WS_PORT)]
    port: u16,

    /// Serial port to open at startup (e.g., /dev/ttyACM0 or COM3)
    #[arg(long)]
    serial_port: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = BAUD_RATE)]
    baud: u32,

    /// Handshake retry interval in milliseconds
    #[arg(long, default_value_t = 500)]
    retry_ms: u64,

    /// Cosmetic vitals refresh interval in milliseconds
    #[arg(long, default_value_t = 2000)]
    vitals_ms: u64,

    /// Command repeated while waiting for the board to report RUNNING
    #[arg(long, value_enum, default_value_t = Probe::Start)]
    running_probe: Probe,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Probe {
    Start,
    Status,
}

impl From<Probe> for Command {
    fn from(probe: Probe) -> Self {
        match probe {
            Probe::Start => Command::Start,
            Probe::Status => Command::Status,
        }
    }
}

impl From<ServeArgs> for BridgeConfig {
    fn from(args: ServeArgs) -> Self {
        BridgeConfig {
            listen: SocketAddr::new(args.bind, args.port),
            baud_rate: args.baud,
            retry_interval: Duration::from_millis(args.retry_ms),
            vitals_interval: Duration::from_millis(args.vitals_ms),
            running_probe: args.running_probe.into(),
            serial_port: args.serial_port,
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    match args.command {
        Some(Mode::Serve(serve)) => serve_bridge(serve.into()),
        Some(Mode::ListPorts) => print_ports(),
        None => serve_bridge(BridgeConfig::default()),
    }
}

fn serve_bridge(config: BridgeConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("tokio runtime init failed")?;
    runtime.block_on(async {
        let hub = Hub::default();
        let connector = Arc::new(SerialConnector {
            baud_rate: config.baud_rate,
        });
        let listen = config.listen;
        let (bridge, handle) = Bridge::new(config, connector, hub.clone());
        tokio::spawn(bridge.run());

        info!("waiting for a client to select the Arduino port");
        server::serve(listen, AppState { hub, bridge: handle })
            .await
            .with_context(|| format!("WebSocket server on {listen} failed"))
    })
}

fn print_ports() -> Result<()> {
    let ports = list_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found!");
        println!("Make sure the Arduino is connected via USB and its drivers are installed.");
        return Ok(());
    }

    println!("Available serial ports:\n");
    for (index, port) in ports.iter().enumerate() {
        println!("{}. {}", index + 1, port.path);
        if let Some(manufacturer) = &port.manufacturer {
            println!("   Manufacturer: {manufacturer}");
        }
        if let Some(serial) = &port.serial_number {
            println!("   Serial Number: {serial}");
        }
    }

    if let Some(port) = suggest_arduino(&ports) {
        println!(
            "\nSuggested Arduino port: {} ({})",
            port.path,
            port.manufacturer.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}
