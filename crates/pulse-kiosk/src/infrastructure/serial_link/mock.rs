//! Scripted serial backend for tests.
//!
//! Lets tests feed sensor text, unplug the device, or make the open fail,
//! without real hardware.
//!
//! ```text
//! let (backend, sensor) = MockSerialBackend::new(vec![arduino("/dev/ttyACM0")]);
//! sensor.send("BPM: 72\r\n");
//! sensor.unplug();
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChunkSource, PortCandidate, PortPicker, SerialBackend, SerialError, UsbDescriptor};

/// Arduino Uno vendor and product ids.
pub const ARDUINO_VID: u16 = 0x2341;
pub const ARDUINO_UNO_PID: u16 = 0x0043;

/// A USB port that looks like an Arduino Uno.
pub fn arduino(name: &str) -> PortCandidate {
    PortCandidate {
        name: name.to_string(),
        usb: Some(UsbDescriptor {
            vendor_id: ARDUINO_VID,
            product_id: ARDUINO_UNO_PID,
            manufacturer: Some("Arduino LLC".into()),
            product: Some("Arduino Uno".into()),
        }),
    }
}

/// What the next `open` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenBehaviour {
    #[default]
    Succeed,
    Busy,
    Missing,
}

enum MockChunk {
    Text(String),
    End,
    Fail,
}

type Feed = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockChunk>>>;

/// Test handle that plays the part of the sensor.
#[derive(Clone)]
pub struct MockSensor {
    tx: mpsc::UnboundedSender<MockChunk>,
}

impl MockSensor {
    /// Sends raw text, exactly as a serial chunk would arrive.
    pub fn send(&self, text: &str) {
        let _ = self.tx.send(MockChunk::Text(text.to_string()));
    }

    /// Ends the stream, as if the USB cable was pulled.
    pub fn unplug(&self) {
        let _ = self.tx.send(MockChunk::End);
    }

    /// Makes the next read fail with an I/O error.
    pub fn fail(&self) {
        let _ = self.tx.send(MockChunk::Fail);
    }
}

/// A [`SerialBackend`] whose ports and data are scripted.
pub struct MockSerialBackend {
    ports: Vec<PortCandidate>,
    open_behaviour: Mutex<OpenBehaviour>,
    feed: Feed,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl MockSerialBackend {
    pub fn new(ports: Vec<PortCandidate>) -> (Self, MockSensor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = Self {
            ports,
            open_behaviour: Mutex::new(OpenBehaviour::Succeed),
            feed: Arc::new(tokio::sync::Mutex::new(rx)),
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        };
        (backend, MockSensor { tx })
    }

    pub fn set_open_behaviour(&self, behaviour: OpenBehaviour) {
        *self
            .open_behaviour
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = behaviour;
    }

    /// Number of successful opens.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of opened ports that have since been dropped.
    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialBackend for MockSerialBackend {
    fn list_ports(&self) -> Result<Vec<PortCandidate>, SerialError> {
        Ok(self.ports.clone())
    }

    async fn open(
        &self,
        port: &PortCandidate,
        _baud_rate: u32,
    ) -> Result<Box<dyn ChunkSource>, SerialError> {
        let behaviour = *self
            .open_behaviour
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match behaviour {
            OpenBehaviour::Busy => Err(SerialError::Busy {
                port: port.name.clone(),
            }),
            OpenBehaviour::Missing => Err(SerialError::NotFound {
                port: port.name.clone(),
            }),
            OpenBehaviour::Succeed => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockChunkSource {
                    feed: Arc::clone(&self.feed),
                    released: Arc::clone(&self.released),
                }))
            }
        }
    }
}

struct MockChunkSource {
    feed: Feed,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl ChunkSource for MockChunkSource {
    async fn read_chunk(&mut self) -> Result<Option<String>, SerialError> {
        let mut feed = self.feed.lock().await;
        match feed.recv().await {
            Some(MockChunk::Text(text)) => Ok(Some(text)),
            Some(MockChunk::End) | None => Ok(None),
            Some(MockChunk::Fail) => Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock read failure",
            ))),
        }
    }
}

impl Drop for MockChunkSource {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`PortPicker`] with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct FixedPortPicker {
    /// Name of the port to choose; `None` dismisses the prompt.
    choice: Option<String>,
}

impl FixedPortPicker {
    pub fn named(name: &str) -> Self {
        Self {
            choice: Some(name.to_string()),
        }
    }

    pub fn cancel() -> Self {
        Self { choice: None }
    }
}

#[async_trait]
impl PortPicker for FixedPortPicker {
    async fn pick(&self, candidates: &[PortCandidate]) -> Option<PortCandidate> {
        let wanted = self.choice.as_deref()?;
        candidates.iter().find(|c| c.name == wanted).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_mock_source_replays_sent_text_then_ends() {
        // Arrange
        let (backend, sensor) = MockSerialBackend::new(vec![arduino("COM3")]);
        let mut source = backend.open(&arduino("COM3"), 9600).await.unwrap();

        // Act
        sensor.send("BPM: 72\r\n");
        sensor.unplug();

        // Assert
        assert_eq!(source.read_chunk().await.unwrap().as_deref(), Some("BPM: 72\r\n"));
        assert_eq!(source.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_waits_until_sensor_sends() {
        // Arrange
        let (backend, sensor) = MockSerialBackend::new(vec![arduino("COM3")]);
        let mut source = backend.open(&arduino("COM3"), 9600).await.unwrap();
        let mut read = task::spawn(source.read_chunk());

        // Act / Assert: nothing to read yet
        assert_pending!(read.poll());
        sensor.send("BPM: 60\r\n");

        assert!(read.is_woken());
        let chunk = assert_ready!(read.poll()).unwrap();
        assert_eq!(chunk.as_deref(), Some("BPM: 60\r\n"));
    }

    #[tokio::test]
    async fn test_released_count_tracks_dropped_sources() {
        let (backend, _sensor) = MockSerialBackend::new(vec![arduino("COM3")]);
        let source = backend.open(&arduino("COM3"), 9600).await.unwrap();
        assert_eq!(backend.released_count(), 0);
        drop(source);
        assert_eq!(backend.released_count(), 1);
        assert_eq!(backend.opened_count(), 1);
    }

    #[tokio::test]
    async fn test_fixed_picker_matches_by_name() {
        let ports = vec![arduino("COM3"), arduino("COM4")];
        assert_eq!(
            FixedPortPicker::named("COM4").pick(&ports).await,
            Some(arduino("COM4"))
        );
        assert_eq!(FixedPortPicker::cancel().pick(&ports).await, None);
    }
}
