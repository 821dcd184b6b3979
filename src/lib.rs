//! Serial-to-WebSocket bridge for Arduino boards running the Chords firmware.
//!
//! The bridge opens a serial port, performs the line-based handshake
//! (`STOP`, `WHORU`, `START`), switches the same byte stream into binary
//! framing and decodes multi-channel samples. Channel 0 feeds an R-peak
//! detector that estimates heart rate. Samples and vitals are pushed to any
//! number of WebSocket clients.
//!
//! # Layers
//!
//! - [`protocol`], [`resync`], [`beat`]: pure wire and signal logic.
//! - [`session`]: the per-connection state machine, free of I/O.
//! - [`serial`], [`bridge`], [`hub`], [`server`]: tokio plumbing around it.
//!
//! # Timing
//!
//! The board does not timestamp frames. Each frame is stamped with the host
//! time at which its bytes arrived, in milliseconds since the Unix epoch, and
//! R-R intervals are measured on that clock. The epoch offset is read once
//! when the bridge starts and then advanced monotonically.

pub mod beat;
pub mod bridge;
pub mod config;
mod errors;
pub mod hub;
pub mod logging;
pub mod messages;
pub mod protocol;
pub mod resync;
pub mod serial;
pub mod server;
pub mod session;
pub mod vitals;

pub use beat::{Beat, BeatDetector};
pub use bridge::{Bridge, BridgeCommand, BridgeHandle};
pub use config::BridgeConfig;
pub use errors::*;
pub use hub::Hub;
pub use messages::{ConnectionStatus, InboundCommand, OutboundMessage, PortDescriptor};
pub use protocol::{BoardProfile, Command, SampleSet};
pub use resync::FrameScanner;
pub use session::{Effect, RetryTicket, Session, SessionConfig, Stage};
pub use vitals::VitalsSnapshot;
