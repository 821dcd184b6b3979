use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
