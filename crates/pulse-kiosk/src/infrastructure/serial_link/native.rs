//! Serial backend built on the `serialport` crate.
//!
//! `serialport` is blocking, so every open and read runs on Tokio's blocking
//! pool.  Reads use a short timeout; a timeout just means "no data yet" and
//! the read is retried, which keeps each blocking call bounded.

use std::io::{self, Read};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{SerialPort, SerialPortType};
use tracing::debug;

use super::{ChunkSource, PortCandidate, SerialBackend, SerialError, UsbDescriptor};

/// Default blocking read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_BUFFER_SIZE: usize = 256;

/// Ports of the local machine.
#[derive(Debug, Clone)]
pub struct NativeSerialBackend {
    read_timeout: Duration,
}

impl NativeSerialBackend {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for NativeSerialBackend {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

#[async_trait]
impl SerialBackend for NativeSerialBackend {
    fn list_ports(&self) -> Result<Vec<PortCandidate>, SerialError> {
        let ports =
            serialport::available_ports().map_err(|e| SerialError::Enumerate(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|info| PortCandidate {
                name: info.port_name,
                usb: match info.port_type {
                    SerialPortType::UsbPort(usb) => Some(UsbDescriptor {
                        vendor_id: usb.vid,
                        product_id: usb.pid,
                        manufacturer: usb.manufacturer,
                        product: usb.product,
                    }),
                    _ => None,
                },
            })
            .collect())
    }

    async fn open(
        &self,
        port: &PortCandidate,
        baud_rate: u32,
    ) -> Result<Box<dyn ChunkSource>, SerialError> {
        let name = port.name.clone();
        let timeout = self.read_timeout;
        let opened = tokio::task::spawn_blocking(move || {
            serialport::new(&name, baud_rate).timeout(timeout).open()
        })
        .await
        .map_err(|e| SerialError::Open {
            port: port.name.clone(),
            reason: e.to_string(),
        })?;

        let serial = opened.map_err(|e| classify_open_error(&port.name, e))?;
        debug!("opened {} at {baud_rate} baud", port.name);
        Ok(Box::new(NativeChunkSource {
            port: Some(serial),
        }))
    }
}

/// Maps a `serialport` open failure onto [`SerialError`].
fn classify_open_error(port: &str, e: serialport::Error) -> SerialError {
    let port = port.to_string();
    match e.kind() {
        serialport::ErrorKind::NoDevice => SerialError::NotFound { port },
        // Windows reports a port held by another program as access denied.
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => SerialError::Busy { port },
        _ if e.description.to_ascii_lowercase().contains("busy") => SerialError::Busy { port },
        _ => SerialError::Open {
            port,
            reason: e.description,
        },
    }
}

/// An open port.
///
/// The port moves into each blocking read and back out again.  If the read
/// future is dropped mid-read the port is released when the blocking call
/// returns.
struct NativeChunkSource {
    port: Option<Box<dyn SerialPort>>,
}

#[async_trait]
impl ChunkSource for NativeChunkSource {
    async fn read_chunk(&mut self) -> Result<Option<String>, SerialError> {
        loop {
            let mut port = self.port.take().ok_or(SerialError::Closed)?;
            let (port, result) = tokio::task::spawn_blocking(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                let result = port.read(&mut buf).map(|n| buf[..n].to_vec());
                (port, result)
            })
            .await
            .map_err(|e| SerialError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
            self.port = Some(port);

            match result {
                Ok(bytes) if bytes.is_empty() => return Ok(None),
                // The sketch prints ASCII; anything else is line noise.
                Ok(bytes) => return Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                    continue
                }
                Err(e) => return Err(SerialError::Io(e)),
            }
        }
    }
}
