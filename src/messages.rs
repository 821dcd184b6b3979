//! JSON messages exchanged with dashboard clients.
//!
//! Every message is an object with a `type` discriminator, e.g.
//! `{"type":"ecg","ecgValue":512,"timestamp":1700000000000}`.

use serde::{Deserialize, Serialize};

use crate::errors::BridgeError;
use crate::vitals::VitalsSnapshot;

/// Serial link state as reported to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn connected(port: &str, message: impl Into<String>) -> Self {
        Self {
            connected: true,
            port: Some(port.to_string()),
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            port: None,
            message: Some("Disconnected".to_string()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            port: None,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// A serial port the bridge could connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescriptor {
    pub path: String,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
}

/// Bridge-to-client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    ConnectionStatus(ConnectionStatus),
    PortsList {
        ports: Vec<PortDescriptor>,
    },
    /// One primary-channel sample.
    Ecg {
        #[serde(rename = "ecgValue")]
        ecg_value: u16,
        /// Milliseconds since the Unix epoch.
        timestamp: u64,
    },
    Vitals {
        data: VitalsSnapshot,
    },
    Error {
        message: String,
    },
}

impl OutboundMessage {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Client-to-bridge commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundCommand {
    ListPorts,
    Connect { port: String },
    Disconnect,
}

impl InboundCommand {
    /// Decode a client message. A `connect` must name a port.
    pub fn parse(text: &str) -> crate::Result<Self> {
        let command: Self = serde_json::from_str(text)?;
        if let Self::Connect { port } = &command {
            if port.trim().is_empty() {
                return Err(BridgeError::Protocol("connect requires a port path".into()));
            }
        }
        Ok(command)
    }
}
