//! Integration tests for a whole kiosk session.
//!
//! These tests run a [`KioskSession`] in the background and talk to it the
//! way the console does: commands go in through an `mpsc` channel, and the
//! test waits for the matching [`KioskEvent`] before sending the next one.
//!
//! Most tests use the [`SimulatedLink`] on a paused clock, so a 20 second
//! turn takes no real time.  The simulator reads once on connect and then
//! every whole second; turns are started half a second later so readings and
//! countdown ticks never land on the same instant:
//!
//! ```text
//! t =   0     0.5    1    1.5    2   ...   20   20.5
//!    reading start reading tick reading   reading tick(0) -> TurnEnded
//! ```
//!
//! That gives exactly 20 recorded readings per 20 second turn.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::{
    ConnectionState, ControllerErrorKind, FollowUp, LinkErrorKind, MatchOutcome, MatchPhase,
    PersistenceErrorKind, PlayerId, PlayerProfile, Verdict,
};
use pulse_kiosk::application::finish_match::{NavigationTarget, ResultStore, SaveStatus};
use pulse_kiosk::application::kiosk_session::{KioskCommand, KioskEvent, KioskSession};
use pulse_kiosk::application::link::BpmLink;
use pulse_kiosk::application::run_match::{MatchEvent, MatchRules};
use pulse_kiosk::infrastructure::serial_link::mock::{arduino, FixedPortPicker, MockSerialBackend};
use pulse_kiosk::infrastructure::serial_link::{SerialLinkConfig, SerialLinkManager};
use pulse_kiosk::infrastructure::simulated_link::{SimulatedLink, SimulatorSettings};
use pulse_kiosk::infrastructure::storage::leaderboard::JsonlResultStore;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

// ── Harness ───────────────────────────────────────────────────────────────────

struct Kiosk {
    commands: mpsc::Sender<KioskCommand>,
    events: broadcast::Receiver<KioskEvent>,
    session: JoinHandle<KioskSession>,
}

impl Kiosk {
    fn start(link: Box<dyn BpmLink>, store: Arc<dyn ResultStore>) -> Self {
        let session = KioskSession::new(link, MatchRules::default(), store);
        let events = session.subscribe();
        let (commands, rx) = mpsc::channel(16);
        Self {
            commands,
            events,
            session: tokio::spawn(session.run(rx)),
        }
    }

    async fn send(&self, command: KioskCommand) {
        self.commands.send(command).await.expect("session running");
    }

    /// Waits for the first event matching `wanted`, returning it together
    /// with everything seen before it.
    async fn until(
        &mut self,
        wanted: impl Fn(&KioskEvent) -> bool,
    ) -> (KioskEvent, Vec<KioskEvent>) {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(120), self.events.recv())
                .await
                .expect("event within 120s")
                .expect("event stream open");
            if wanted(&event) {
                return (event, seen);
            }
            seen.push(event);
        }
    }

    async fn until_phase(&mut self, phase: MatchPhase) -> Vec<KioskEvent> {
        self.until(|e| *e == KioskEvent::Match(MatchEvent::PhaseChanged(phase)))
            .await
            .1
    }

    async fn shutdown(self) -> KioskSession {
        let _ = self.commands.send(KioskCommand::Shutdown).await;
        self.session.await.expect("session task")
    }
}

fn players() -> [PlayerProfile; 2] {
    [
        PlayerProfile {
            name: "Ana".into(),
            section: "12-A".into(),
            email: "ana@example.com".into(),
        },
        PlayerProfile::named("Ben"),
    ]
}

fn simulator(min_bpm: u16, max_bpm: u16) -> Box<dyn BpmLink> {
    Box::new(SimulatedLink::new(SimulatorSettings {
        min_bpm,
        max_bpm,
        seed: Some(2024),
        ..SimulatorSettings::default()
    }))
}

fn board_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("pulse_match_flow_{}", Uuid::new_v4()))
        .join("leaderboard.jsonl")
}

fn recorded_for(events: &[KioskEvent], player: PlayerId) -> Vec<u16> {
    events
        .iter()
        .filter_map(|e| match e {
            KioskEvent::Match(MatchEvent::BpmReading {
                value,
                recorded_for: Some(p),
                ..
            }) if *p == player => Some(*value),
            _ => None,
        })
        .collect()
}

/// Plays one full 20 second turn and returns the events it produced.
async fn play_turn(kiosk: &mut Kiosk, player: PlayerId) -> (u16, Vec<KioskEvent>) {
    tokio::time::sleep(Duration::from_millis(500)).await;
    kiosk.send(KioskCommand::StartTurn(player.number())).await;
    let (ended, events) = kiosk
        .until(|e| matches!(e, KioskEvent::Match(MatchEvent::TurnEnded { .. })))
        .await;
    match ended {
        KioskEvent::Match(MatchEvent::TurnEnded {
            player: ended_for,
            final_score,
        }) => {
            assert_eq!(ended_for, player);
            (final_score, events)
        }
        _ => unreachable!(),
    }
}

/// Sets up a match, connects, and plays both turns.
async fn play_match(kiosk: &mut Kiosk) -> MatchOutcome {
    kiosk.send(KioskCommand::NewMatch(players())).await;
    kiosk.until_phase(MatchPhase::WaitingForConnection).await;
    kiosk.send(KioskCommand::Connect).await;
    kiosk.until_phase(MatchPhase::Player1Ready).await;

    play_turn(kiosk, PlayerId::One).await;
    kiosk.send(KioskCommand::ConfirmHandoff).await;
    kiosk.until_phase(MatchPhase::Player2Ready).await;
    play_turn(kiosk, PlayerId::Two).await;

    match kiosk
        .until(|e| matches!(e, KioskEvent::Match(MatchEvent::MatchComplete(_))))
        .await
        .0
    {
        KioskEvent::Match(MatchEvent::MatchComplete(outcome)) => outcome,
        _ => unreachable!(),
    }
}

// ── Full matches ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_turn_records_one_reading_per_second_and_keeps_the_last() {
    // Arrange
    let store = Arc::new(JsonlResultStore::new(board_path()));
    let mut kiosk = Kiosk::start(simulator(60, 140), store);
    kiosk.send(KioskCommand::NewMatch(players())).await;
    kiosk.send(KioskCommand::Connect).await;
    kiosk.until_phase(MatchPhase::Player1Ready).await;

    // Act
    let (final_score, events) = play_turn(&mut kiosk, PlayerId::One).await;

    // Assert
    let recorded = recorded_for(&events, PlayerId::One);
    assert_eq!(recorded.len(), 20);
    assert_eq!(Some(&final_score), recorded.last());
    let ticks: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            KioskEvent::Match(MatchEvent::TurnTick {
                remaining_seconds, ..
            }) => Some(*remaining_seconds),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, (0..20).rev().collect::<Vec<u32>>());

    // Shutting down releases the link; the finished turn is kept for later.
    let session = kiosk.shutdown().await;
    let state = session.controller().state();
    assert_eq!(state.phase, MatchPhase::WaitingForConnection);
    assert_eq!(state.resume_phase, Some(MatchPhase::Player1Done));
    assert_eq!(state.slot(PlayerId::One).score, final_score);
}

#[tokio::test(start_paused = true)]
async fn test_double_win_is_saved_then_goes_to_photobooth() {
    // Arrange: every reading reaches the 100 BPM target
    let path = board_path();
    let store = Arc::new(JsonlResultStore::new(path.clone()));
    let mut kiosk = Kiosk::start(simulator(100, 130), store.clone());

    // Act
    let outcome = play_match(&mut kiosk).await;
    kiosk
        .send(KioskCommand::Navigate(NavigationTarget::Photobooth))
        .await;
    let (navigation, before) = kiosk
        .until(|e| matches!(e, KioskEvent::NavigationRequested { .. }))
        .await;

    // Assert
    assert!(outcome.any_winner);
    assert_eq!(outcome.follow_up, FollowUp::Photobooth);
    assert!(outcome.results.iter().all(|r| r.verdict == Verdict::Win));
    assert!(before.contains(&KioskEvent::ResultsSaved));
    assert_eq!(
        navigation,
        KioskEvent::NavigationRequested {
            target: NavigationTarget::Photobooth,
            saved: true,
        }
    );

    let board = store.top_n(10).await.unwrap();
    assert_eq!(board.len(), 2);
    assert!(board.iter().all(|r| r.status == "WIN"));
    assert!(board.iter().all(|r| r.match_label == "Ana & Ben"));
    let ana = board.iter().find(|r| r.name == "Ana").unwrap();
    assert_eq!(ana.score, outcome.result(PlayerId::One).score);
    assert_eq!(ana.section, "12-A");
    assert_eq!(ana.email, "ana@example.com");

    // Navigation hands the kiosk back to a fresh idle state.
    let session = kiosk.shutdown().await;
    assert_eq!(session.controller().state().phase, MatchPhase::Idle);
    assert_eq!(session.save_status(), SaveStatus::NotSaved);

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[tokio::test(start_paused = true)]
async fn test_no_winner_offers_retry_and_retry_saves_nothing() {
    // Arrange: every reading stays below the target
    let path = board_path();
    let store = Arc::new(JsonlResultStore::new(path.clone()));
    let mut kiosk = Kiosk::start(simulator(60, 90), store.clone());
    let outcome = play_match(&mut kiosk).await;
    assert!(!outcome.any_winner);
    assert_eq!(outcome.follow_up, FollowUp::Retry);

    // Act: the photobooth is not on offer
    kiosk
        .send(KioskCommand::Navigate(NavigationTarget::Photobooth))
        .await;
    let (rejected, _) = kiosk
        .until(|e| matches!(e, KioskEvent::Match(MatchEvent::CommandRejected(_))))
        .await;
    kiosk.send(KioskCommand::Retry).await;
    kiosk.until_phase(MatchPhase::Idle).await;
    kiosk.until_phase(MatchPhase::Player1Ready).await;

    // Assert
    assert_eq!(
        rejected,
        KioskEvent::Match(MatchEvent::CommandRejected(ControllerErrorKind::InvalidPhase))
    );
    let session = kiosk.shutdown().await;
    let state = session.controller().state();
    assert_eq!(state.scores(), [0, 0]);
    assert_eq!(state.match_label(), "Ana & Ben");
    assert!(store.top_n(10).await.unwrap().is_empty());
    assert!(!path.exists());
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_keeps_results_for_a_second_attempt() {
    // Arrange: a directory where the file should be makes appends fail
    let path = board_path();
    std::fs::create_dir_all(&path).unwrap();
    let store = Arc::new(JsonlResultStore::new(path.clone()));
    let mut kiosk = Kiosk::start(simulator(100, 130), store.clone());
    play_match(&mut kiosk).await;

    // Act: first attempt fails
    kiosk.send(KioskCommand::Navigate(NavigationTarget::Home)).await;
    let (failed, _) = kiosk
        .until(|e| matches!(e, KioskEvent::PersistenceFailed(_)))
        .await;

    // Assert: nothing navigated, the outcome is still there
    match failed {
        KioskEvent::PersistenceFailed(e) => assert_eq!(e.kind, PersistenceErrorKind::WriteFailed),
        _ => unreachable!(),
    }

    // Act: clear the obstruction and try again
    std::fs::remove_dir(&path).unwrap();
    kiosk.send(KioskCommand::Navigate(NavigationTarget::Home)).await;
    let (navigation, before) = kiosk
        .until(|e| matches!(e, KioskEvent::NavigationRequested { .. }))
        .await;

    // Assert
    assert!(before.contains(&KioskEvent::ResultsSaved));
    assert_eq!(
        navigation,
        KioskEvent::NavigationRequested {
            target: NavigationTarget::Home,
            saved: true,
        }
    );
    assert_eq!(store.top_n(10).await.unwrap().len(), 2);

    kiosk.shutdown().await;
    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[tokio::test(start_paused = true)]
async fn test_skip_save_navigates_home_without_writing() {
    let path = board_path();
    let store = Arc::new(JsonlResultStore::new(path.clone()));
    let mut kiosk = Kiosk::start(simulator(100, 130), store.clone());
    play_match(&mut kiosk).await;

    kiosk.send(KioskCommand::SkipSave(NavigationTarget::Home)).await;
    let (navigation, _) = kiosk
        .until(|e| matches!(e, KioskEvent::NavigationRequested { .. }))
        .await;

    assert_eq!(
        navigation,
        KioskEvent::NavigationRequested {
            target: NavigationTarget::Home,
            saved: false,
        }
    );
    assert!(store.top_n(10).await.unwrap().is_empty());
    kiosk.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_leaderboard_command_lists_saved_records() {
    // Arrange
    let path = board_path();
    let store = Arc::new(JsonlResultStore::new(path.clone()));
    let mut kiosk = Kiosk::start(simulator(100, 130), store);
    play_match(&mut kiosk).await;
    kiosk.send(KioskCommand::Navigate(NavigationTarget::Home)).await;
    kiosk
        .until(|e| matches!(e, KioskEvent::NavigationRequested { .. }))
        .await;

    // Act
    kiosk.send(KioskCommand::ShowLeaderboard).await;
    let (board, _) = kiosk
        .until(|e| matches!(e, KioskEvent::Leaderboard(_)))
        .await;

    // Assert: highest score first
    match board {
        KioskEvent::Leaderboard(rows) => {
            assert_eq!(rows.len(), 2);
            assert!(rows[0].score >= rows[1].score);
        }
        _ => unreachable!(),
    }

    kiosk.shutdown().await;
    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

// ── Link loss ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_stream_end_mid_turn_aborts_and_resumes_after_reconnect() {
    // Arrange: the simulator stops after 5 readings (t = 0..4) and is lost
    // at t = 5, after 4 countdown ticks (t = 1.5..4.5).
    let link = SimulatedLink::new(SimulatorSettings {
        end_after: Some(5),
        seed: Some(9),
        ..SimulatorSettings::default()
    });
    let store = Arc::new(JsonlResultStore::new(board_path()));
    let mut kiosk = Kiosk::start(Box::new(link), store);
    kiosk.send(KioskCommand::NewMatch(players())).await;
    kiosk.send(KioskCommand::Connect).await;
    kiosk.until_phase(MatchPhase::Player1Ready).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Act
    kiosk.send(KioskCommand::StartTurn(1)).await;
    let events = kiosk.until_phase(MatchPhase::WaitingForConnection).await;

    // Assert
    assert!(events.contains(&KioskEvent::LinkFault(LinkErrorKind::StreamEnded)));
    assert!(events.contains(&KioskEvent::ConnectionChanged(ConnectionState::Lost)));
    assert!(events.contains(&KioskEvent::Match(MatchEvent::TurnAborted {
        player: PlayerId::One,
        remaining_seconds: 16,
    })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, KioskEvent::Match(MatchEvent::TurnEnded { .. }))));

    // A turn cannot start while the link is down.
    kiosk.send(KioskCommand::StartTurn(1)).await;
    let (rejected, _) = kiosk
        .until(|e| matches!(e, KioskEvent::Match(MatchEvent::CommandRejected(_))))
        .await;
    assert_eq!(
        rejected,
        KioskEvent::Match(MatchEvent::CommandRejected(ControllerErrorKind::NotConnected))
    );

    // Reconnecting gives player 1 a fresh turn.
    kiosk.send(KioskCommand::Connect).await;
    kiosk.until_phase(MatchPhase::Player1Ready).await;
    let session = kiosk.shutdown().await;
    assert_eq!(session.controller().state().slot(PlayerId::One).score, 0);
    assert!(!session.controller().is_recording());
}

#[tokio::test]
async fn test_unplugged_sensor_aborts_turn_through_serial_link() {
    // Arrange
    let (backend, sensor) = MockSerialBackend::new(vec![arduino("COM3")]);
    let backend = Arc::new(backend);
    let link = SerialLinkManager::new(
        backend.clone(),
        Arc::new(FixedPortPicker::named("COM3")),
        SerialLinkConfig::default(),
    );
    let store = Arc::new(JsonlResultStore::new(board_path()));
    let mut kiosk = Kiosk::start(Box::new(link), store);
    kiosk.send(KioskCommand::NewMatch(players())).await;
    kiosk.send(KioskCommand::Connect).await;
    kiosk.until_phase(MatchPhase::Player1Ready).await;
    kiosk.send(KioskCommand::StartTurn(1)).await;
    kiosk.until_phase(MatchPhase::Player1Recording).await;
    sensor.send("BPM: 88\r\n");
    let (reading, _) = kiosk
        .until(|e| matches!(e, KioskEvent::Match(MatchEvent::BpmReading { .. })))
        .await;
    assert_eq!(
        reading,
        KioskEvent::Match(MatchEvent::BpmReading {
            value: 88,
            in_normal_band: true,
            recorded_for: Some(PlayerId::One),
        })
    );

    // Act
    sensor.unplug();
    let (aborted, _) = kiosk
        .until(|e| matches!(e, KioskEvent::Match(MatchEvent::TurnAborted { .. })))
        .await;

    // Assert
    assert!(matches!(
        aborted,
        KioskEvent::Match(MatchEvent::TurnAborted {
            player: PlayerId::One,
            ..
        })
    ));
    kiosk.until_phase(MatchPhase::WaitingForConnection).await;
    assert_eq!(backend.released_count(), 1);

    let session = kiosk.shutdown().await;
    assert_eq!(session.controller().state().slot(PlayerId::One).score, 0);
    assert_eq!(session.link_state(), ConnectionState::Disconnected);
}
