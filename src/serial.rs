//! Serial port access: opening, reading, writing and enumeration.
//!
//! `serialport` is blocking, so each open port gets a reader thread that
//! forwards chunks to the async bridge over an unbounded channel. Writes go
//! through a cloned handle from the bridge task.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serialport::{SerialPort, SerialPortType};
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::messages::PortDescriptor;
use crate::protocol::{Command, BAUD_RATE};

/// Read timeout; bounds how long a reader thread lingers after close.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Read chunk size.
const READ_CHUNK: usize = 256;

/// Manufacturer substrings that usually mean an Arduino or a USB-serial clone.
const ARDUINO_HINTS: [&str; 3] = ["arduino", "ftdi", "ch340"];

/// Something that happened on an open port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    Data(Vec<u8>),
    Error(String),
    Closed,
}

/// Serial events tagged with the connection they belong to.
pub type EventSender = mpsc::UnboundedSender<(u64, SerialEvent)>;

/// Write side of an open connection.
pub trait Transport: Send {
    fn send(&mut self, command: Command) -> Result<()>;
}

/// Opens connections for the bridge.
pub trait Connector: Send + Sync {
    /// Open `path` and start delivering its events tagged with `id`.
    fn open(&self, path: &str, id: u64, events: EventSender) -> Result<Box<dyn Transport>>;

    fn list_ports(&self) -> Result<Vec<PortDescriptor>>;
}

// ============================================================================
// serialport backend
// ============================================================================

/// [`Connector`] backed by real serial ports.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub baud_rate: u32,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
        }
    }
}

impl Connector for SerialConnector {
    fn open(&self, path: &str, id: u64, events: EventSender) -> Result<Box<dyn Transport>> {
        let link = SerialLink::open(path, self.baud_rate, id, events)?;
        Ok(Box::new(link))
    }

    fn list_ports(&self) -> Result<Vec<PortDescriptor>> {
        list_ports()
    }
}

/// An open serial port plus its reader thread.
pub struct SerialLink {
    path: String,
    writer: Box<dyn SerialPort>,
    stop: Arc<AtomicBool>,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32, id: u64, events: EventSender) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        let reader = port.try_clone()?;
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread_path = path.to_string();
        thread::Builder::new()
            .name(format!("serial-reader-{id}"))
            .spawn(move || read_loop(reader, &thread_path, id, events, &thread_stop))?;

        info!("opened {} at {} baud", path, baud_rate);
        Ok(Self {
            path: path.to_string(),
            writer: port,
            stop,
        })
    }
}

impl Transport for SerialLink {
    fn send(&mut self, command: Command) -> Result<()> {
        debug!("-> {}: {:?}", self.path, command);
        self.writer.write_all(command.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    path: &str,
    id: u64,
    events: EventSender,
    stop: &AtomicBool,
) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        if stop.load(Ordering::SeqCst) {
            debug!("reader for {} stopping", path);
            return;
        }
        let event = match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => SerialEvent::Data(buf[..n].to_vec()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe || e.kind() == ErrorKind::NotConnected => {
                let _ = events.send((id, SerialEvent::Closed));
                return;
            }
            Err(e) => {
                warn!("read error on {}: {}", path, e);
                let _ = events.send((id, SerialEvent::Error(e.to_string())));
                return;
            }
        };
        if events.send((id, event)).is_err() {
            return;
        }
    }
}

// ============================================================================
// Enumeration
// ============================================================================

/// Enumerate serial ports visible to the OS.
pub fn list_ports() -> Result<Vec<PortDescriptor>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (manufacturer, serial_number) = match p.port_type {
                SerialPortType::UsbPort(usb) => (usb.manufacturer, usb.serial_number),
                _ => (None, None),
            };
            PortDescriptor {
                path: p.port_name,
                manufacturer,
                serial_number,
            }
        })
        .collect())
}

/// First port whose manufacturer looks like an Arduino or USB-serial clone.
pub fn suggest_arduino(ports: &[PortDescriptor]) -> Option<&PortDescriptor> {
    ports.iter().find(|p| {
        p.manufacturer.as_deref().is_some_and(|m| {
            let m = m.to_lowercase();
            ARDUINO_HINTS.iter().any(|hint| m.contains(hint))
        })
    })
}
