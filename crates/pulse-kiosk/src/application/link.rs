//! The heart-rate link abstraction consumed by the kiosk session.
//!
//! Both the physical serial link and the simulated link implement
//! [`BpmLink`] and publish through a [`LinkPublisher`], so the match logic
//! cannot tell which one is attached.
//!
//! # Event stream
//!
//! Subscribers receive [`LinkEvent`]s in the order the link produced them:
//!
//! ```text
//! StateChanged(Connecting)
//! StateChanged(Connected)
//! Reading(72) Reading(74) ...
//! Fault(StreamEnded)
//! StateChanged(Lost)
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use pulse_core::{BpmReading, ConnectErrorKind, ConnectionState, LinkErrorKind};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffered link events per subscriber before the oldest are dropped.
const LINK_EVENT_CAPACITY: usize = 64;

/// Events pushed by a link to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    Reading(BpmReading),
    Fault(LinkErrorKind),
}

/// Identifies an opened-but-not-yet-reading connection.
///
/// Returned by [`BpmLink::request_connection`] and handed back to
/// [`BpmLink::start_reading`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub port_name: String,
}

impl ConnectionHandle {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            port_name: port_name.into(),
        }
    }
}

/// A source of BPM readings with an explicit connection lifecycle.
#[async_trait]
pub trait BpmLink: Send {
    /// Selects and opens an endpoint.
    ///
    /// On success the link is `Connected` but not yet reading.
    async fn request_connection(&mut self) -> Result<ConnectionHandle, ConnectErrorKind>;

    /// Starts the read task for a handle returned by `request_connection`.
    ///
    /// A stale or unknown handle is ignored with a warning.
    fn start_reading(&mut self, handle: ConnectionHandle);

    /// Stops reading, releases the endpoint, and returns to `Disconnected`.
    async fn disconnect(&mut self);

    /// Subscribes to the link's event stream.
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;

    /// The current connection state.
    fn state(&self) -> ConnectionState;
}

/// Shared connection state plus the broadcast channel every link publishes on.
///
/// Cloned into the read task so the task can report readings, faults, and
/// the `Lost` transition without holding a reference to the link itself.
#[derive(Debug, Clone)]
pub struct LinkPublisher {
    state: Arc<Mutex<ConnectionState>>,
    events: broadcast::Sender<LinkEvent>,
}

impl LinkPublisher {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `next` and notifies subscribers.
    ///
    /// Illegal transitions are refused with a warning; a transition to the
    /// current state is a silent no-op.  Returns `true` if the state changed.
    pub fn transition(&self, next: ConnectionState) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let current = *state;
            if current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!("refusing link transition {current:?} -> {next:?}");
                return false;
            }
            *state = next;
            info!("link state {current:?} -> {next:?}");
        }
        self.send(LinkEvent::StateChanged(next));
        true
    }

    pub fn publish_reading(&self, reading: BpmReading) {
        debug!("bpm reading {}", reading.value);
        self.send(LinkEvent::Reading(reading));
    }

    pub fn publish_fault(&self, kind: LinkErrorKind) {
        warn!("link fault: {kind}");
        self.send(LinkEvent::Fault(kind));
    }

    fn send(&self, event: LinkEvent) {
        // No subscribers is not an error: the link may run before the UI attaches.
        let _ = self.events.send(event);
    }
}

impl Default for LinkPublisher {
    fn default() -> Self {
        Self::new()
    }
}
