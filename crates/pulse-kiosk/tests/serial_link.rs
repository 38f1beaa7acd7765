//! Integration tests for the serial link state machine.
//!
//! These tests drive [`SerialLinkManager`] through the public [`BpmLink`]
//! API with the scripted backend from `serial_link::mock`, the same way the
//! kiosk session does.  They verify:
//!
//! - Every way a connection attempt can fail, and that a failed attempt
//!   leaves the link `Disconnected`.
//! - Readings are parsed out of chunks that split lines anywhere.
//! - Unplugging or a read error releases the port, reports the fault, and
//!   leaves the link `Lost` until it is explicitly disconnected.
//!
//! # Connection states
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Lost
//!      ▲               │              │          │
//!      └───────────────┴──────────────┴──────────┘  (disconnect / open failed)
//! ```

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{ConnectErrorKind, ConnectionState, LinkErrorKind};
use pulse_kiosk::application::link::{BpmLink, LinkEvent};
use pulse_kiosk::infrastructure::serial_link::mock::{
    arduino, FixedPortPicker, MockSensor, MockSerialBackend, OpenBehaviour, ARDUINO_VID,
};
use pulse_kiosk::infrastructure::serial_link::{
    PortCandidate, PortPicker, SerialLinkConfig, SerialLinkManager,
};
use tokio::sync::broadcast;

const PORT: &str = "/dev/ttyACM0";

// ── Helpers ───────────────────────────────────────────────────────────────────

fn manager_with(
    ports: Vec<PortCandidate>,
    picker: impl PortPicker + 'static,
    config: SerialLinkConfig,
) -> (SerialLinkManager, Arc<MockSerialBackend>, MockSensor) {
    let (backend, sensor) = MockSerialBackend::new(ports);
    let backend = Arc::new(backend);
    let manager = SerialLinkManager::new(backend.clone(), Arc::new(picker), config);
    (manager, backend, sensor)
}

fn arduino_manager() -> (SerialLinkManager, Arc<MockSerialBackend>, MockSensor) {
    manager_with(
        vec![arduino(PORT)],
        FixedPortPicker::named(PORT),
        SerialLinkConfig::default(),
    )
}

async fn next_event(rx: &mut broadcast::Receiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("link event within 5s")
        .expect("link event stream open")
}

/// Connects and starts reading, consuming the `Connecting`/`Connected` events.
async fn connect_and_read(
    manager: &mut SerialLinkManager,
    rx: &mut broadcast::Receiver<LinkEvent>,
) {
    let handle = manager.request_connection().await.expect("connect");
    assert_eq!(handle.port_name, PORT);
    manager.start_reading(handle);
    assert_eq!(
        next_event(rx).await,
        LinkEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        next_event(rx).await,
        LinkEvent::StateChanged(ConnectionState::Connected)
    );
}

// ── Connection failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_picker_is_no_port_selected() {
    // Arrange
    let (mut manager, backend, _sensor) = manager_with(
        vec![arduino(PORT)],
        FixedPortPicker::cancel(),
        SerialLinkConfig::default(),
    );

    // Act
    let result = manager.request_connection().await;

    // Assert
    assert_eq!(result.unwrap_err(), ConnectErrorKind::NoPortSelected);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(backend.opened_count(), 0);
}

#[tokio::test]
async fn test_no_ports_available_is_no_port_selected() {
    let (mut manager, _backend, _sensor) = manager_with(
        Vec::new(),
        FixedPortPicker::named(PORT),
        SerialLinkConfig::default(),
    );

    let result = manager.request_connection().await;

    assert_eq!(result.unwrap_err(), ConnectErrorKind::NoPortSelected);
}

#[tokio::test]
async fn test_non_usb_port_is_invalid_port() {
    // Arrange: a built-in UART with no USB descriptor
    let uart = PortCandidate {
        name: "/dev/ttyS0".into(),
        usb: None,
    };
    let (mut manager, backend, _sensor) = manager_with(
        vec![uart],
        FixedPortPicker::named("/dev/ttyS0"),
        SerialLinkConfig::default(),
    );

    // Act
    let result = manager.request_connection().await;

    // Assert: rejected before any open attempt
    assert_eq!(result.unwrap_err(), ConnectErrorKind::InvalidPort);
    assert_eq!(backend.opened_count(), 0);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_vendor_outside_allow_list_is_invalid_port() {
    let config = SerialLinkConfig {
        allowed_vendor_ids: vec![ARDUINO_VID + 1],
        ..SerialLinkConfig::default()
    };
    let (mut manager, _backend, _sensor) =
        manager_with(vec![arduino(PORT)], FixedPortPicker::named(PORT), config);

    let result = manager.request_connection().await;

    assert_eq!(result.unwrap_err(), ConnectErrorKind::InvalidPort);
}

#[tokio::test]
async fn test_busy_port_is_port_busy_and_returns_to_disconnected() {
    // Arrange
    let (mut manager, backend, _sensor) = arduino_manager();
    backend.set_open_behaviour(OpenBehaviour::Busy);
    let mut rx = manager.subscribe();

    // Act
    let result = manager.request_connection().await;

    // Assert
    assert_eq!(result.unwrap_err(), ConnectErrorKind::PortBusy);
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::StateChanged(ConnectionState::Disconnected)
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_vanished_port_is_open_failed() {
    let (mut manager, backend, _sensor) = arduino_manager();
    backend.set_open_behaviour(OpenBehaviour::Missing);

    let result = manager.request_connection().await;

    assert_eq!(result.unwrap_err(), ConnectErrorKind::OpenFailed);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_second_connect_is_already_connected() {
    // Arrange
    let (mut manager, backend, _sensor) = arduino_manager();
    let mut rx = manager.subscribe();
    connect_and_read(&mut manager, &mut rx).await;

    // Act
    let result = manager.request_connection().await;

    // Assert: the live port is untouched
    assert_eq!(result.unwrap_err(), ConnectErrorKind::AlreadyConnected);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(backend.opened_count(), 1);
    assert_eq!(backend.released_count(), 0);
}

// ── Reading ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_readings_survive_lines_split_across_chunks() {
    // Arrange
    let (mut manager, _backend, sensor) = arduino_manager();
    let mut rx = manager.subscribe();
    connect_and_read(&mut manager, &mut rx).await;

    // Act: realistic sketch output, chopped at arbitrary points
    sensor.send("PulseSensor Started!\r\nSignal: 51");
    sensor.send("2\r\nBPM: 0\r\nBPM: 7");
    sensor.send("4\r\nSignal: 530\r\nBPM: 81\r");
    sensor.send("\n");

    // Assert: `BPM: 0` means no pulse yet and is dropped
    let mut values = Vec::new();
    while values.len() < 2 {
        if let LinkEvent::Reading(reading) = next_event(&mut rx).await {
            values.push(reading.value);
        }
    }
    assert_eq!(values, vec![74, 81]);
}

#[tokio::test]
async fn test_disconnect_stops_reading_and_releases_port() {
    // Arrange
    let (mut manager, backend, sensor) = arduino_manager();
    let mut rx = manager.subscribe();
    connect_and_read(&mut manager, &mut rx).await;
    sensor.send("BPM: 72\r\n");
    assert!(matches!(next_event(&mut rx).await, LinkEvent::Reading(_)));

    // Act
    manager.disconnect().await;

    // Assert
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::StateChanged(ConnectionState::Disconnected)
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(backend.released_count(), 1);
}

#[tokio::test]
async fn test_disconnect_before_start_reading_releases_port() {
    let (mut manager, backend, _sensor) = arduino_manager();
    manager.request_connection().await.unwrap();

    manager.disconnect().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(backend.released_count(), 1);
}

// ── Link loss ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unplug_releases_port_then_reports_stream_ended() {
    // Arrange
    let (mut manager, backend, sensor) = arduino_manager();
    let mut rx = manager.subscribe();
    connect_and_read(&mut manager, &mut rx).await;

    // Act
    sensor.unplug();

    // Assert: the port is already released when the fault is seen
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::Fault(LinkErrorKind::StreamEnded)
    );
    assert_eq!(backend.released_count(), 1);
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::StateChanged(ConnectionState::Lost)
    );
    assert_eq!(manager.state(), ConnectionState::Lost);
}

#[tokio::test]
async fn test_read_error_is_read_fault() {
    let (mut manager, _backend, sensor) = arduino_manager();
    let mut rx = manager.subscribe();
    connect_and_read(&mut manager, &mut rx).await;

    sensor.fail();

    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::Fault(LinkErrorKind::ReadFault)
    );
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::StateChanged(ConnectionState::Lost)
    );
}

#[tokio::test]
async fn test_lost_link_needs_disconnect_before_reconnecting() {
    // Arrange: lose the link
    let (mut manager, backend, sensor) = arduino_manager();
    let mut rx = manager.subscribe();
    connect_and_read(&mut manager, &mut rx).await;
    sensor.unplug();
    while next_event(&mut rx).await != LinkEvent::StateChanged(ConnectionState::Lost) {}

    // Act / Assert: Lost does not clear itself
    assert_eq!(
        manager.request_connection().await.unwrap_err(),
        ConnectErrorKind::AlreadyConnected
    );
    manager.disconnect().await;
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::StateChanged(ConnectionState::Disconnected)
    );

    // The cable is back: a fresh connection opens the port again
    connect_and_read(&mut manager, &mut rx).await;
    sensor.send("BPM: 90\r\n");
    match next_event(&mut rx).await {
        LinkEvent::Reading(reading) => assert_eq!(reading.value, 90),
        other => panic!("expected a reading, got {other:?}"),
    }
    assert_eq!(backend.opened_count(), 2);
}
