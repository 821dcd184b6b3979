use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::{Command, BAUD_RATE};
use crate::session::{SessionConfig, RETRY_INTERVAL};

/// WebSocket port the dashboard connects to.
pub const DEFAULT_WS_PORT: u16 = 8080;

/// How often the cosmetic vitals are refreshed.
pub const VITALS_INTERVAL: Duration = Duration::from_secs(2);

/// Runtime settings for the bridge and its WebSocket server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub listen: SocketAddr,
    pub baud_rate: u32,
    pub retry_interval: Duration,
    pub vitals_interval: Duration,
    /// Command repeated while waiting for the board to confirm streaming.
    pub running_probe: Command,
    /// Port to open at startup, before any client asks.
    pub serial_port: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_WS_PORT),
            baud_rate: BAUD_RATE,
            retry_interval: RETRY_INTERVAL,
            vitals_interval: VITALS_INTERVAL,
            running_probe: Command::Start,
            serial_port: None,
        }
    }
}

impl BridgeConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retry_interval: self.retry_interval,
            running_probe: self.running_probe,
        }
    }
}
