//! A [`BpmLink`] that invents heart rates.
//!
//! Used for demos and tests when no sensor is plugged in.  Connecting always
//! succeeds; one reading per tick is drawn uniformly from a band.  With a
//! seed the sequence is the same on every connection.

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::{
    BpmReading, ConnectErrorKind, ConnectionState, LinkErrorKind, MAX_ACCEPTED_BPM,
    MIN_ACCEPTED_BPM,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::link::{BpmLink, ConnectionHandle, LinkEvent, LinkPublisher};
use crate::infrastructure::read_task::ReadTask;

/// Port name reported by the simulator.
pub const SIMULATED_PORT_NAME: &str = "simulated";

/// Simulator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorSettings {
    pub min_bpm: u16,
    pub max_bpm: u16,
    pub tick: Duration,
    pub seed: Option<u64>,
    /// Ends the stream after this many readings, as if unplugged.
    pub end_after: Option<u32>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            min_bpm: 55,
            max_bpm: 120,
            tick: Duration::from_secs(1),
            seed: None,
            end_after: None,
        }
    }
}

pub struct SimulatedLink {
    settings: SimulatorSettings,
    publisher: LinkPublisher,
    pending: Option<Uuid>,
    reader: Option<ReadTask>,
}

impl SimulatedLink {
    pub fn new(settings: SimulatorSettings) -> Self {
        let (min_bpm, max_bpm) = if settings.min_bpm <= settings.max_bpm {
            (settings.min_bpm, settings.max_bpm)
        } else {
            warn!(
                "simulator band {}..={} is inverted; swapping",
                settings.min_bpm, settings.max_bpm
            );
            (settings.max_bpm, settings.min_bpm)
        };
        let accepted = MIN_ACCEPTED_BPM..=MAX_ACCEPTED_BPM;
        let (min_bpm, max_bpm) = if accepted.contains(&min_bpm) && accepted.contains(&max_bpm) {
            (min_bpm, max_bpm)
        } else {
            let clamped = (
                min_bpm.clamp(MIN_ACCEPTED_BPM, MAX_ACCEPTED_BPM),
                max_bpm.clamp(MIN_ACCEPTED_BPM, MAX_ACCEPTED_BPM),
            );
            warn!(
                "simulator band {min_bpm}..={max_bpm} leaves {MIN_ACCEPTED_BPM}..={MAX_ACCEPTED_BPM}; using {}..={}",
                clamped.0, clamped.1
            );
            clamped
        };
        Self {
            settings: SimulatorSettings {
                min_bpm,
                max_bpm,
                ..settings
            },
            publisher: LinkPublisher::new(),
            pending: None,
            reader: None,
        }
    }

    fn rng(&self) -> StdRng {
        match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[async_trait]
impl BpmLink for SimulatedLink {
    async fn request_connection(&mut self) -> Result<ConnectionHandle, ConnectErrorKind> {
        let state = self.publisher.state();
        if state != ConnectionState::Disconnected {
            warn!("connect requested while simulated link is {state:?}");
            return Err(ConnectErrorKind::AlreadyConnected);
        }
        self.publisher.transition(ConnectionState::Connecting);
        self.publisher.transition(ConnectionState::Connected);
        let handle = ConnectionHandle::new(SIMULATED_PORT_NAME);
        self.pending = Some(handle.id);
        Ok(handle)
    }

    fn start_reading(&mut self, handle: ConnectionHandle) {
        if self.pending != Some(handle.id) {
            warn!("start_reading with unknown simulator handle");
            return;
        }
        self.pending = None;

        let publisher = self.publisher.clone();
        let mut rng = self.rng();
        let SimulatorSettings {
            min_bpm,
            max_bpm,
            tick,
            end_after,
            ..
        } = self.settings.clone();
        info!("simulating {min_bpm}..={max_bpm} bpm every {tick:?}");

        self.reader = Some(ReadTask::spawn(move |mut stop| async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sent = 0u32;
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if end_after.is_some_and(|limit| sent >= limit) {
                            publisher.publish_fault(LinkErrorKind::StreamEnded);
                            publisher.transition(ConnectionState::Lost);
                            break;
                        }
                        publisher.publish_reading(BpmReading::new(rng.gen_range(min_bpm..=max_bpm)));
                        sent += 1;
                    }
                }
            }
            debug!("simulator stopped after {sent} readings");
        }));
    }

    async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop().await;
        }
        self.pending = None;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> SimulatorSettings {
        SimulatorSettings {
            seed: Some(seed),
            ..SimulatorSettings::default()
        }
    }

    async fn readings(link: &mut SimulatedLink, count: usize) -> Vec<u16> {
        let mut rx = link.subscribe();
        let handle = link.request_connection().await.unwrap();
        link.start_reading(handle);
        let mut values = Vec::new();
        while values.len() < count {
            if let Ok(LinkEvent::Reading(r)) = rx.recv().await {
                values.push(r.value);
            }
        }
        link.disconnect().await;
        values
    }

    #[tokio::test(start_paused = true)]
    async fn test_readings_stay_inside_band() {
        // Arrange
        let mut link = SimulatedLink::new(SimulatorSettings {
            min_bpm: 60,
            max_bpm: 65,
            ..seeded(7)
        });

        // Act
        let values = readings(&mut link, 30).await;

        // Assert
        assert!(values.iter().all(|v| (60..=65).contains(v)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_gives_same_sequence() {
        let a = readings(&mut SimulatedLink::new(seeded(42)), 10).await;
        let b = readings(&mut SimulatedLink::new(seeded(42)), 10).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_connect_twice_is_already_connected() {
        let mut link = SimulatedLink::new(SimulatorSettings::default());
        link.request_connection().await.unwrap();
        assert_eq!(
            link.request_connection().await,
            Err(ConnectErrorKind::AlreadyConnected)
        );
    }

    #[tokio::test]
    async fn test_disconnect_returns_to_disconnected() {
        let mut link = SimulatedLink::new(SimulatorSettings::default());
        let handle = link.request_connection().await.unwrap();
        link.start_reading(handle);
        link.disconnect().await;
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_after_moves_link_to_lost() {
        // Arrange
        let mut link = SimulatedLink::new(SimulatorSettings {
            end_after: Some(3),
            ..seeded(1)
        });
        let mut rx = link.subscribe();
        let handle = link.request_connection().await.unwrap();

        // Act
        link.start_reading(handle);
        let mut events = Vec::new();
        loop {
            let event = rx.recv().await.unwrap();
            let lost = event == LinkEvent::StateChanged(ConnectionState::Lost);
            events.push(event);
            if lost {
                break;
            }
        }

        // Assert
        let count = events
            .iter()
            .filter(|e| matches!(e, LinkEvent::Reading(_)))
            .count();
        assert_eq!(count, 3);
        assert!(events.contains(&LinkEvent::Fault(LinkErrorKind::StreamEnded)));
        assert_eq!(link.state(), ConnectionState::Lost);
    }

    #[test]
    fn test_inverted_band_is_swapped() {
        let link = SimulatedLink::new(SimulatorSettings {
            min_bpm: 120,
            max_bpm: 55,
            ..SimulatorSettings::default()
        });
        assert_eq!((link.settings.min_bpm, link.settings.max_bpm), (55, 120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_band_is_clamped_to_accepted_bpm() {
        // Arrange
        let mut link = SimulatedLink::new(SimulatorSettings {
            min_bpm: 300,
            max_bpm: 400,
            ..seeded(3)
        });
        assert_eq!(
            (link.settings.min_bpm, link.settings.max_bpm),
            (MAX_ACCEPTED_BPM, MAX_ACCEPTED_BPM)
        );

        // Act
        let values = readings(&mut link, 5).await;

        // Assert
        assert!(values.iter().all(|v| *v == MAX_ACCEPTED_BPM));
    }

    #[test]
    fn test_zero_floor_is_raised_to_minimum() {
        let link = SimulatedLink::new(SimulatorSettings {
            min_bpm: 0,
            max_bpm: 80,
            ..SimulatorSettings::default()
        });
        assert_eq!((link.settings.min_bpm, link.settings.max_bpm), (MIN_ACCEPTED_BPM, 80));
    }
}
