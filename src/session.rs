//! Per-connection handshake and streaming state machine.
//!
//! A [`Session`] owns everything tied to one open serial link: the handshake
//! stage, the byte buffer, the identified board, the beat detector and the
//! vitals it feeds. It performs no I/O. Every entry point returns the
//! [`Effect`]s the caller must carry out, in order.
//!
//! # Handshake
//!
//! ```text
//! idle --open--> awaiting-board --identity--> awaiting-running --RUNNING--> streaming
//!                      ^ WHORU every 500 ms         ^ START/STATUS every 500 ms
//! ```
//!
//! Retries never give up; a silent board simply never reaches `streaming`.
//! Retry timers are identified by a generation number, and any ticket that
//! does not match the current generation (or arrives after close) is ignored.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

use crate::beat::BeatDetector;
use crate::messages::{ConnectionStatus, OutboundMessage};
use crate::protocol::{
    decode_samples, packet_len_for, take_line, BoardProfile, Command, SampleSet,
    DEFAULT_CHANNELS, RUNNING, STOPPED, UNKNOWN_COMMAND,
};
use crate::resync::{FrameScanner, ScanStats};
use crate::vitals::VitalsSnapshot;

/// Default delay between handshake retries.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Longest handshake line kept while waiting for its newline.
pub const MAX_PENDING_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    AwaitingBoard,
    AwaitingRunning,
    Streaming,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::AwaitingBoard => "awaiting-board",
            Stage::AwaitingRunning => "awaiting-running",
            Stage::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Handle for one armed retry timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTicket {
    generation: u64,
}

/// Something the I/O layer has to do on behalf of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a command line to the board.
    Write(Command),
    /// Broadcast a message to every listener.
    Publish(OutboundMessage),
    /// Call [`Session::on_retry_due`] with this ticket after the delay.
    /// Replaces any previously armed timer.
    ArmRetry(RetryTicket, Duration),
    /// Drop the armed retry timer, if any.
    CancelRetry,
}

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub retry_interval: Duration,
    /// Command repeated while waiting for `RUNNING`.
    pub running_probe: Command,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_interval: RETRY_INTERVAL,
            running_probe: Command::Start,
        }
    }
}

/// State for one serial connection.
pub struct Session {
    port: String,
    config: SessionConfig,
    open: bool,
    stage: Stage,
    buffer: Vec<u8>,
    board: Option<BoardProfile>,
    scanner: FrameScanner,
    detector: BeatDetector,
    vitals: VitalsSnapshot,
    last_samples: Option<SampleSet>,
    retry_generation: u64,
    retry_armed: bool,
}

impl Session {
    /// Create a session for `port`. `now_ms` seeds the beat detector clock.
    pub fn new(port: impl Into<String>, config: SessionConfig, now_ms: u64) -> Self {
        Self {
            port: port.into(),
            config,
            open: false,
            stage: Stage::Idle,
            buffer: Vec::new(),
            board: None,
            scanner: FrameScanner::new(packet_len_for(DEFAULT_CHANNELS)),
            detector: BeatDetector::new(now_ms),
            vitals: VitalsSnapshot::default(),
            last_samples: None,
            retry_generation: 0,
            retry_armed: false,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn board(&self) -> Option<&BoardProfile> {
        self.board.as_ref()
    }

    /// Expected binary frame size; based on the default board until identified.
    pub fn packet_len(&self) -> usize {
        self.scanner.packet_len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn scan_stats(&self) -> ScanStats {
        self.scanner.stats()
    }

    pub fn vitals(&self) -> VitalsSnapshot {
        self.vitals
    }

    /// Every channel of the most recently decoded frame.
    pub fn last_samples(&self) -> Option<&SampleSet> {
        self.last_samples.as_ref()
    }

    pub fn retry_armed(&self) -> bool {
        self.retry_armed
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// The port finished opening: stop any stale stream and ask for identity.
    pub fn on_open(&mut self) -> Vec<Effect> {
        info!("serial port {} open", self.port);
        self.open = true;
        self.stage = Stage::AwaitingBoard;

        let mut effects = vec![Effect::Publish(OutboundMessage::ConnectionStatus(
            ConnectionStatus::connected(&self.port, "Connected successfully"),
        ))];
        effects.push(self.arm_retry());
        effects.push(Effect::Write(Command::Stop));
        effects.push(Effect::Write(Command::Whoru));
        effects
    }

    /// Bytes arrived from the port. `now_ms` is the arrival time in
    /// milliseconds since the Unix epoch.
    pub fn on_bytes(&mut self, chunk: &[u8], now_ms: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.open || chunk.is_empty() {
            return effects;
        }
        self.buffer.extend_from_slice(chunk);

        if self.stage != Stage::Streaming {
            while let Some(line) = take_line(&mut self.buffer) {
                if line.is_empty() {
                    continue;
                }
                self.handle_line(&line, &mut effects);
                if self.stage == Stage::Streaming {
                    break;
                }
            }
            if self.stage != Stage::Streaming && self.buffer.len() > MAX_PENDING_LINE {
                warn!(
                    "discarding {} bytes without a line ending from {}",
                    self.buffer.len(),
                    self.port
                );
                self.buffer.clear();
            }
        }

        if self.stage == Stage::Streaming && !self.buffer.is_empty() {
            self.process_frames(now_ms, &mut effects);
        }
        effects
    }

    /// A retry timer fired. Stale or post-close tickets do nothing.
    pub fn on_retry_due(&mut self, ticket: RetryTicket) -> Vec<Effect> {
        if !self.open || !self.retry_armed || ticket.generation != self.retry_generation {
            debug!("ignoring stale retry ticket {}", ticket.generation);
            return Vec::new();
        }

        let command = match self.stage {
            Stage::AwaitingBoard => Command::Whoru,
            Stage::AwaitingRunning => self.config.running_probe,
            Stage::Idle | Stage::Streaming => {
                self.retry_armed = false;
                return Vec::new();
            }
        };
        debug!("handshake retry in {}: {:?}", self.stage, command);
        vec![Effect::Write(command), self.arm_retry()]
    }

    /// The port closed underneath us.
    pub fn on_close(&mut self) -> Vec<Effect> {
        if !self.open {
            return Vec::new();
        }
        info!("serial port {} closed", self.port);
        let mut effects = self.reset();
        effects.push(Effect::Publish(OutboundMessage::ConnectionStatus(
            ConnectionStatus::disconnected(),
        )));
        effects.push(Effect::Publish(OutboundMessage::Vitals {
            data: self.vitals,
        }));
        effects
    }

    /// The transport reported an error; the link is considered gone.
    pub fn on_error(&mut self, error: &str) -> Vec<Effect> {
        if !self.open {
            return Vec::new();
        }
        warn!("serial port {} error: {}", self.port, error);
        let mut effects = self.reset();
        effects.push(Effect::Publish(OutboundMessage::ConnectionStatus(
            ConnectionStatus::failed(error),
        )));
        effects.push(Effect::Publish(OutboundMessage::Vitals {
            data: self.vitals,
        }));
        effects
    }

    /// A client asked to disconnect: stop the board, then close.
    pub fn on_disconnect(&mut self) -> Vec<Effect> {
        if !self.open {
            return Vec::new();
        }
        let mut effects = vec![Effect::Write(Command::Stop)];
        effects.extend(self.on_close());
        effects
    }

    /// Periodic refresh of the cosmetic vitals.
    pub fn refresh_vitals<R: Rng>(&mut self, rng: &mut R) -> Vec<Effect> {
        if !self.open || !self.vitals.randomize(self.detector.buffered(), rng) {
            return Vec::new();
        }
        vec![Effect::Publish(OutboundMessage::Vitals {
            data: self.vitals,
        })]
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn handle_line(&mut self, line: &str, effects: &mut Vec<Effect>) {
        if line == UNKNOWN_COMMAND {
            warn!("board reported {} during handshake", UNKNOWN_COMMAND);
            return;
        }

        match self.stage {
            Stage::AwaitingBoard => {
                let board = BoardProfile::resolve(line);
                if !board.is_known() {
                    warn!(
                        "unrecognized board {:?}, assuming {} channels",
                        board.identity, board.channels
                    );
                }
                info!(
                    "Chords firmware detected: {} ({} channels, {} byte frames)",
                    board.identity,
                    board.channels,
                    board.packet_len()
                );
                self.scanner = FrameScanner::new(board.packet_len());
                effects.push(Effect::Publish(OutboundMessage::ConnectionStatus(
                    ConnectionStatus::connected(
                        &self.port,
                        format!("Connected to {}", board.identity),
                    ),
                )));
                self.board = Some(board);
                self.stage = Stage::AwaitingRunning;
                effects.push(Effect::Write(Command::Start));
                effects.push(self.arm_retry());
            }
            Stage::AwaitingRunning if line == RUNNING => {
                self.stage = Stage::Streaming;
                self.buffer.clear();
                effects.push(self.cancel_retry());
                info!("Chords firmware streaming started");
            }
            Stage::AwaitingRunning if line == STOPPED => {
                debug!("board reports stopped, reissuing START");
                effects.push(Effect::Write(Command::Start));
                effects.push(self.arm_retry());
            }
            _ => info!("board: {}", line),
        }
    }

    fn process_frames(&mut self, now_ms: u64, effects: &mut Vec<Effect>) {
        let channels = self
            .board
            .as_ref()
            .map_or(DEFAULT_CHANNELS, |board| board.channels);

        for frame in self.scanner.extract(&mut self.buffer) {
            let samples = decode_samples(&frame, channels);
            let Some(value) = samples.primary() else {
                continue;
            };
            self.vitals.leads_off = false;

            if let Some(beat) = self.detector.push(value, now_ms) {
                self.vitals.heart_rate = beat.heart_rate;
                effects.push(Effect::Publish(OutboundMessage::Vitals {
                    data: self.vitals,
                }));
            }
            effects.push(Effect::Publish(OutboundMessage::Ecg {
                ecg_value: value,
                timestamp: now_ms,
            }));
            self.last_samples = Some(samples);
        }
    }

    fn arm_retry(&mut self) -> Effect {
        self.retry_generation += 1;
        self.retry_armed = true;
        Effect::ArmRetry(
            RetryTicket {
                generation: self.retry_generation,
            },
            self.config.retry_interval,
        )
    }

    fn cancel_retry(&mut self) -> Effect {
        self.retry_generation += 1;
        self.retry_armed = false;
        Effect::CancelRetry
    }

    /// Drop all per-connection state. Returns the retry cancellation.
    fn reset(&mut self) -> Vec<Effect> {
        let cancel = self.cancel_retry();
        let stats = self.scan_stats();
        if stats.frames > 0 || stats.discarded > 0 {
            info!(
                "session {} decoded {} frames, discarded {} bytes",
                self.port, stats.frames, stats.discarded
            );
        }
        self.open = false;
        self.stage = Stage::Idle;
        self.buffer.clear();
        self.board = None;
        self.scanner = FrameScanner::new(packet_len_for(DEFAULT_CHANNELS));
        self.detector = BeatDetector::new(0);
        self.vitals = VitalsSnapshot::default();
        self.last_samples = None;
        vec![cancel]
    }
}
