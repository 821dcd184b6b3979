//! Chords firmware wire protocol.
//!
//! The board speaks two dialects over the same serial stream:
//!
//! - **Handshake mode**: newline-terminated ASCII lines. The host sends
//!   commands (`STOP`, `WHORU`, `START`, `STATUS`) and the board answers with
//!   its identity string or a status sentinel (`RUNNING`, `STOPPED`).
//! - **Streaming mode**: fixed-size binary frames.
//!
//! # Frame layout
//!
//! ```text
//! offset 0      SYNC_BYTE_1 (0xC7)
//! offset 1      SYNC_BYTE_2 (0x7C)
//! offset 2      reserved header byte
//! offset 3..    N channels x 2 bytes, big-endian unsigned
//! last          END_BYTE (0x01)
//! ```

use std::collections::HashMap;

use once_cell::sync::Lazy;

// ============================================================================
// Constants
// ============================================================================

/// Serial baud rate used by the Chords firmware.
pub const BAUD_RATE: u32 = 115_200;

/// First byte of every binary frame.
pub const SYNC_BYTE_1: u8 = 0xC7;
/// Second byte of every binary frame.
pub const SYNC_BYTE_2: u8 = 0x7C;
/// Trailing byte of every binary frame.
pub const END_BYTE: u8 = 0x01;
/// Sync pair plus the reserved header byte.
pub const HEADER_LEN: usize = 3;

/// Channel count assumed for boards missing from the lookup table.
pub const DEFAULT_CHANNELS: usize = 8;

/// Line the firmware prints when it does not understand a command.
pub const UNKNOWN_COMMAND: &str = "UNKNOWN COMMAND";
/// Line confirming the board is streaming binary frames.
pub const RUNNING: &str = "RUNNING";
/// Line reporting the board is idle.
pub const STOPPED: &str = "STOPPED";

static BOARD_CHANNELS: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    HashMap::from([
        ("UNO-R3", 6),
        ("GENUINO-UNO", 6),
        ("UNO-CLONE", 6),
        ("MAKER-UNO", 6),
        ("NANO-CLASSIC", 8),
        ("NANO-CLONE", 8),
        ("MAKER-NANO", 8),
        ("MEGA-2560-R3", 16),
        ("MEGA-2560-CLONE", 16),
    ])
});

// ============================================================================
// Commands
// ============================================================================

/// Host-to-board commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
    /// Identity request ("who are you").
    Whoru,
    Start,
    /// "Are you running" probe.
    Status,
}

impl Command {
    /// The command as it goes on the wire, newline included.
    pub fn as_line(self) -> &'static str {
        match self {
            Command::Stop => "STOP\n",
            Command::Whoru => "WHORU\n",
            Command::Start => "START\n",
            Command::Status => "STATUS\n",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_line().as_bytes()
    }
}

// ============================================================================
// Board identity
// ============================================================================

/// Identity reported by the board and the framing it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardProfile {
    /// Identity line as sent by the firmware (trimmed).
    pub identity: String,
    /// Number of analog channels in each frame.
    pub channels: usize,
}

impl BoardProfile {
    /// Resolve an identity string against the board table.
    ///
    /// Matching is exact; unknown boards fall back to [`DEFAULT_CHANNELS`].
    pub fn resolve(identity: &str) -> Self {
        let channels = BOARD_CHANNELS
            .get(identity)
            .copied()
            .unwrap_or(DEFAULT_CHANNELS);
        Self {
            identity: identity.to_string(),
            channels,
        }
    }

    /// Whether the identity was found in the board table.
    pub fn is_known(&self) -> bool {
        BOARD_CHANNELS.contains_key(self.identity.as_str())
    }

    /// Size in bytes of one binary frame for this board.
    pub fn packet_len(&self) -> usize {
        packet_len_for(self.channels)
    }
}

/// Frame length for `channels` channels: header, payload and end marker.
pub const fn packet_len_for(channels: usize) -> usize {
    channels * 2 + HEADER_LEN + 1
}

// ============================================================================
// Sample decoding
// ============================================================================

/// One decoded frame: a value per channel, in channel order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSet {
    pub values: Vec<u16>,
}

impl SampleSet {
    /// Channel 0, the ECG-like signal used for beat detection.
    pub fn primary(&self) -> Option<u16> {
        self.values.first().copied()
    }
}

/// Decode `channels` big-endian u16 values from a validated frame.
///
/// Frames are length-checked by the scanner, so a short frame only yields the
/// channels that fit.
pub fn decode_samples(frame: &[u8], channels: usize) -> SampleSet {
    let values = frame
        .get(HEADER_LEN..)
        .unwrap_or_default()
        .chunks_exact(2)
        .take(channels)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    SampleSet { values }
}

// ============================================================================
// Line handling
// ============================================================================

/// Pop the next newline-terminated line from `buffer`.
///
/// Returns `None` when no complete line is buffered. The returned line has its
/// trailing carriage return and surrounding whitespace removed and may be empty.
pub fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let newline = buffer.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = buffer.drain(..=newline).collect();
    let text = String::from_utf8_lossy(&raw[..newline]);
    Some(text.trim_end_matches('\r').trim().to_string())
}
