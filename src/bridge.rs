//! Connection manager.
//!
//! One task owns the active [`Session`] and its port. Client commands, serial
//! events, the retry deadline and the vitals tick are all handled from the
//! same `select!` loop, so the byte buffer and handshake stage only ever see
//! one mutation at a time.

use std::future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::BridgeConfig;
use crate::errors::{BridgeError, Result};
use crate::hub::Hub;
use crate::messages::{ConnectionStatus, OutboundMessage, PortDescriptor};
use crate::serial::{Connector, SerialEvent, Transport};
use crate::session::{Effect, RetryTicket, Session};
use crate::vitals::VitalsSnapshot;

/// Queue depth for client commands.
const COMMAND_QUEUE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    Connect(String),
    Disconnect,
}

/// Cloneable handle used by the server to drive the bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<BridgeCommand>,
    connector: Arc<dyn Connector>,
}

impl BridgeHandle {
    pub async fn connect(&self, port: impl Into<String>) -> Result<()> {
        self.send(BridgeCommand::Connect(port.into())).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(BridgeCommand::Disconnect).await
    }

    /// Enumerate ports on a blocking thread.
    pub async fn list_ports(&self) -> Result<Vec<PortDescriptor>> {
        let connector = Arc::clone(&self.connector);
        tokio::task::spawn_blocking(move || connector.list_ports())
            .await
            .map_err(|e| BridgeError::ChannelClosed(format!("port listing task: {e}")))?
    }

    async fn send(&self, command: BridgeCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::ChannelClosed("bridge task has stopped".into()))
    }
}

struct Active {
    id: u64,
    session: Session,
    transport: Box<dyn Transport>,
    retry: Option<(RetryTicket, Instant)>,
}

/// The connection-manager task. Create with [`Bridge::new`], then `run` it.
pub struct Bridge {
    config: BridgeConfig,
    connector: Arc<dyn Connector>,
    hub: Hub,
    commands: mpsc::Receiver<BridgeCommand>,
    events: mpsc::UnboundedReceiver<(u64, SerialEvent)>,
    events_tx: mpsc::UnboundedSender<(u64, SerialEvent)>,
    active: Option<Active>,
    next_id: u64,
    clock: Clock,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
        hub: Hub,
    ) -> (Self, BridgeHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (events_tx, events) = mpsc::unbounded_channel();
        let handle = BridgeHandle {
            commands: commands_tx,
            connector: Arc::clone(&connector),
        };
        let bridge = Self {
            config,
            connector,
            hub,
            commands,
            events,
            events_tx,
            active: None,
            next_id: 0,
            clock: Clock::start(),
        };
        (bridge, handle)
    }

    /// Process events until every [`BridgeHandle`] is dropped.
    pub async fn run(mut self) {
        if let Some(port) = self.config.serial_port.clone() {
            self.connect(&port);
        }

        let mut vitals_tick = time::interval(self.config.vitals_interval);
        vitals_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self
                .active
                .as_ref()
                .and_then(|active| active.retry.map(|(_, at)| at));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(BridgeCommand::Connect(port)) => self.connect(&port),
                    Some(BridgeCommand::Disconnect) => self.disconnect(),
                    None => break,
                },
                Some((id, event)) = self.events.recv() => self.on_serial(id, event),
                _ = retry_due(retry_at) => self.on_retry(),
                _ = vitals_tick.tick() => self.on_vitals_tick(),
            }
        }

        if self.active.is_some() {
            self.disconnect();
        }
        info!("bridge stopped");
    }

    fn connect(&mut self, port: &str) {
        if self.active.is_some() {
            self.disconnect();
        }

        info!("attempting to connect to {}", port);
        self.next_id += 1;
        let id = self.next_id;
        let transport = match self.connector.open(port, id, self.events_tx.clone()) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("failed to open {}: {}", port, e);
                self.hub
                    .publish(OutboundMessage::ConnectionStatus(ConnectionStatus::failed(
                        e.to_string(),
                    )));
                return;
            }
        };

        let mut active = Active {
            id,
            session: Session::new(port, self.config.session_config(), self.clock.now_ms()),
            transport,
            retry: None,
        };
        let effects = active.session.on_open();
        apply(&self.hub, &mut active, effects);
        self.active = Some(active);
    }

    fn disconnect(&mut self) {
        let Some(mut active) = self.active.take() else {
            debug!("disconnect requested with no open port");
            self.hub
                .publish(OutboundMessage::ConnectionStatus(ConnectionStatus::disconnected()));
            self.hub.publish(OutboundMessage::Vitals {
                data: VitalsSnapshot::default(),
            });
            return;
        };
        info!("disconnecting from {}", active.session.port());
        let effects = active.session.on_disconnect();
        apply(&self.hub, &mut active, effects);
    }

    fn on_serial(&mut self, id: u64, event: SerialEvent) {
        let Some(active) = self.active.as_mut().filter(|active| active.id == id) else {
            debug!("dropping event from stale connection {}", id);
            return;
        };

        let now = self.clock.now_ms();
        let (effects, finished) = match event {
            SerialEvent::Data(bytes) => (active.session.on_bytes(&bytes, now), false),
            SerialEvent::Error(error) => (active.session.on_error(&error), true),
            SerialEvent::Closed => (active.session.on_close(), true),
        };
        apply(&self.hub, active, effects);
        if finished {
            self.active = None;
        }
    }

    fn on_retry(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some((ticket, _)) = active.retry.take() else {
            return;
        };
        let effects = active.session.on_retry_due(ticket);
        apply(&self.hub, active, effects);
    }

    fn on_vitals_tick(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let effects = active.session.refresh_vitals(&mut rand::thread_rng());
        apply(&self.hub, active, effects);
    }
}

fn apply(hub: &Hub, active: &mut Active, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Write(command) => {
                if let Err(e) = active.transport.send(command) {
                    warn!(
                        "failed to send {:?} to {}: {}",
                        command,
                        active.session.port(),
                        e
                    );
                }
            }
            Effect::Publish(message) => hub.publish(message),
            Effect::ArmRetry(ticket, delay) => {
                active.retry = Some((ticket, Instant::now() + delay));
            }
            Effect::CancelRetry => active.retry = None,
        }
    }
}

async fn retry_due(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => future::pending().await,
    }
}

/// Milliseconds since the Unix epoch, read once at startup and advanced on
/// the tokio clock so timestamps never step backwards.
#[derive(Debug, Clone, Copy)]
struct Clock {
    epoch_ms: u64,
    started: Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            epoch_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            started: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.started.elapsed().as_millis() as u64
    }
}
