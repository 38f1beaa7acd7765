//! USB serial sensor link.
//!
//! [`SerialLinkManager`] implements [`BpmLink`] on top of two small traits so
//! the state machine can be tested without hardware:
//!
//! - [`SerialBackend`] enumerates and opens ports (`native` uses the
//!   `serialport` crate, `mock` is scripted by tests).
//! - [`ChunkSource`] yields decoded text chunks from an open port.
//!
//! # Read pipeline (for beginners)
//!
//! ```text
//! ChunkSource ─"Signal: 51"─► LineAssembler ─"BPM: 74"─► parse_bpm ─► Reading(74)
//!             ─"2\r\nBPM: 7"─►      (buffers partial lines)
//!             ─"4\r\n"──────►
//! ```
//!
//! When the source reports end-of-stream (device unplugged) or a read error,
//! the port is released, a [`LinkErrorKind`] fault is published, and the link
//! moves to `Lost`.  It stays there until [`BpmLink::disconnect`] is called.

pub mod mock;
pub mod native;

use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::{parse_bpm, ConnectErrorKind, ConnectionState, LineAssembler, LinkErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::application::link::{BpmLink, ConnectionHandle, LinkEvent, LinkPublisher};
use crate::infrastructure::read_task::ReadTask;

/// Baud rate of the pulse sensor sketch.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

// ── Port description ──────────────────────────────────────────────────────────

/// USB identity of a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// A port the operator can choose from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCandidate {
    pub name: String,
    /// `None` for non-USB ports (built-in UARTs, Bluetooth, PCI).
    pub usb: Option<UsbDescriptor>,
}

impl PortCandidate {
    /// One-line description for a selection prompt.
    pub fn describe(&self) -> String {
        match &self.usb {
            Some(usb) => format!(
                "{} ({:04x}:{:04x} {})",
                self.name,
                usb.vendor_id,
                usb.product_id,
                usb.product.as_deref().unwrap_or("USB serial")
            ),
            None => format!("{} (not USB)", self.name),
        }
    }
}

/// Checks a chosen port before it is opened.
///
/// Only USB serial devices are accepted.  When `allowed_vendor_ids` is not
/// empty the device's vendor must be listed.
pub fn validate_port(port: &PortCandidate, allowed_vendor_ids: &[u16]) -> Result<(), ConnectErrorKind> {
    let Some(usb) = &port.usb else {
        return Err(ConnectErrorKind::InvalidPort);
    };
    if !allowed_vendor_ids.is_empty() && !allowed_vendor_ids.contains(&usb.vendor_id) {
        return Err(ConnectErrorKind::InvalidPort);
    }
    Ok(())
}

// ── Backend traits ────────────────────────────────────────────────────────────

/// Errors raised by serial backends.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("could not enumerate serial ports: {0}")]
    Enumerate(String),

    #[error("port {port} not found")]
    NotFound { port: String },

    #[error("port {port} is busy")]
    Busy { port: String },

    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("port already released")]
    Closed,

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SerialError {
    /// The user-facing category of a failed open.
    pub fn connect_kind(&self) -> ConnectErrorKind {
        match self {
            SerialError::Busy { .. } => ConnectErrorKind::PortBusy,
            SerialError::NotFound { .. } | SerialError::Open { .. } => ConnectErrorKind::OpenFailed,
            SerialError::Enumerate(_) | SerialError::Closed | SerialError::Io(_) => {
                ConnectErrorKind::Unknown
            }
        }
    }
}

/// Enumerates and opens serial ports.
#[async_trait]
pub trait SerialBackend: Send + Sync {
    fn list_ports(&self) -> Result<Vec<PortCandidate>, SerialError>;

    async fn open(
        &self,
        port: &PortCandidate,
        baud_rate: u32,
    ) -> Result<Box<dyn ChunkSource>, SerialError>;
}

/// Text arriving from an open port.
#[async_trait]
pub trait ChunkSource: Send {
    /// The next chunk of text.  `Ok(None)` means the stream ended.
    ///
    /// Must be cancel-safe enough to be dropped mid-read when the link stops.
    async fn read_chunk(&mut self) -> Result<Option<String>, SerialError>;
}

/// Lets the operator choose a port.  `None` means the prompt was dismissed.
#[async_trait]
pub trait PortPicker: Send + Sync {
    async fn pick(&self, candidates: &[PortCandidate]) -> Option<PortCandidate>;
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialLinkConfig {
    pub baud_rate: u32,
    pub allowed_vendor_ids: Vec<u16>,
}

impl Default for SerialLinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            allowed_vendor_ids: Vec::new(),
        }
    }
}

/// [`BpmLink`] over a USB serial port.
pub struct SerialLinkManager {
    backend: Arc<dyn SerialBackend>,
    picker: Arc<dyn PortPicker>,
    config: SerialLinkConfig,
    publisher: LinkPublisher,
    /// Opened port waiting for `start_reading`.
    pending: Option<(ConnectionHandle, Box<dyn ChunkSource>)>,
    reader: Option<ReadTask>,
}

impl SerialLinkManager {
    pub fn new(
        backend: Arc<dyn SerialBackend>,
        picker: Arc<dyn PortPicker>,
        config: SerialLinkConfig,
    ) -> Self {
        Self {
            backend,
            picker,
            config,
            publisher: LinkPublisher::new(),
            pending: None,
            reader: None,
        }
    }
}

#[async_trait]
impl BpmLink for SerialLinkManager {
    async fn request_connection(&mut self) -> Result<ConnectionHandle, ConnectErrorKind> {
        let state = self.publisher.state();
        if state != ConnectionState::Disconnected {
            warn!("connect requested while link is {state:?}");
            return Err(ConnectErrorKind::AlreadyConnected);
        }

        let candidates = self.backend.list_ports().map_err(|e| {
            error!("{e}");
            e.connect_kind()
        })?;
        debug!("{} serial ports available", candidates.len());

        let Some(port) = self.picker.pick(&candidates).await else {
            info!("port selection cancelled");
            return Err(ConnectErrorKind::NoPortSelected);
        };
        if let Err(kind) = validate_port(&port, &self.config.allowed_vendor_ids) {
            warn!("rejected port {}: {kind}", port.describe());
            return Err(kind);
        }

        self.publisher.transition(ConnectionState::Connecting);
        match self.backend.open(&port, self.config.baud_rate).await {
            Ok(source) => {
                self.publisher.transition(ConnectionState::Connected);
                let handle = ConnectionHandle::new(port.name);
                self.pending = Some((handle.clone(), source));
                Ok(handle)
            }
            Err(e) => {
                let kind = e.connect_kind();
                warn!("{e}");
                self.publisher.transition(ConnectionState::Disconnected);
                Err(kind)
            }
        }
    }

    fn start_reading(&mut self, handle: ConnectionHandle) {
        let source = match self.pending.take() {
            Some((pending, source)) if pending.id == handle.id => source,
            other => {
                warn!("start_reading with unknown handle for {}", handle.port_name);
                self.pending = other;
                return;
            }
        };
        info!("reading from {}", handle.port_name);
        let publisher = self.publisher.clone();
        self.reader = Some(ReadTask::spawn(move |stop| {
            read_loop(source, publisher, stop)
        }));
    }

    async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop().await;
        }
        if self.pending.take().is_some() {
            debug!("released port that was never read");
        }
        if self.publisher.state() != ConnectionState::Disconnected {
            self.publisher.transition(ConnectionState::Disconnected);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.publisher.subscribe()
    }

    fn state(&self) -> ConnectionState {
        self.publisher.state()
    }
}

/// Reads chunks until stopped, the stream ends, or a read fails.
async fn read_loop(
    mut source: Box<dyn ChunkSource>,
    publisher: LinkPublisher,
    mut stop: oneshot::Receiver<()>,
) {
    let mut assembler = LineAssembler::new();
    let fault = loop {
        tokio::select! {
            _ = &mut stop => break None,
            chunk = source.read_chunk() => match chunk {
                Ok(Some(text)) => {
                    for line in assembler.push(&text) {
                        match parse_bpm(&line) {
                            Some(reading) => publisher.publish_reading(reading),
                            None => trace!("ignored line {line:?}"),
                        }
                    }
                }
                Ok(None) => break Some(LinkErrorKind::StreamEnded),
                Err(e) => {
                    error!("serial read failed: {e}");
                    break Some(LinkErrorKind::ReadFault);
                }
            },
        }
    };

    // Release the port before anyone reacts to the loss.
    drop(source);
    if let Some(kind) = fault {
        publisher.publish_fault(kind);
        publisher.transition(ConnectionState::Lost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, vendor_id: u16) -> PortCandidate {
        PortCandidate {
            name: name.into(),
            usb: Some(UsbDescriptor {
                vendor_id,
                product_id: 0x0043,
                manufacturer: Some("Arduino".into()),
                product: Some("Uno".into()),
            }),
        }
    }

    #[test]
    fn test_validate_accepts_any_usb_port_without_allow_list() {
        assert_eq!(validate_port(&usb("/dev/ttyACM0", 0x2341), &[]), Ok(()));
    }

    #[test]
    fn test_validate_rejects_non_usb_port() {
        let port = PortCandidate {
            name: "/dev/ttyS0".into(),
            usb: None,
        };
        assert_eq!(validate_port(&port, &[]), Err(ConnectErrorKind::InvalidPort));
    }

    #[test]
    fn test_validate_enforces_vendor_allow_list() {
        let allowed = [0x2341, 0x1a86];
        assert_eq!(validate_port(&usb("COM3", 0x1a86), &allowed), Ok(()));
        assert_eq!(
            validate_port(&usb("COM4", 0x0403), &allowed),
            Err(ConnectErrorKind::InvalidPort)
        );
    }

    #[test]
    fn test_serial_errors_map_to_connect_kinds() {
        let busy = SerialError::Busy { port: "COM3".into() };
        let missing = SerialError::NotFound { port: "COM9".into() };
        let other = SerialError::Open {
            port: "COM3".into(),
            reason: "protocol error".into(),
        };
        assert_eq!(busy.connect_kind(), ConnectErrorKind::PortBusy);
        assert_eq!(missing.connect_kind(), ConnectErrorKind::OpenFailed);
        assert_eq!(other.connect_kind(), ConnectErrorKind::OpenFailed);
        assert_eq!(
            SerialError::Enumerate("no udev".into()).connect_kind(),
            ConnectErrorKind::Unknown
        );
    }

    #[test]
    fn test_describe_includes_usb_ids() {
        assert_eq!(
            usb("/dev/ttyACM0", 0x2341).describe(),
            "/dev/ttyACM0 (2341:0043 Uno)"
        );
    }
}
