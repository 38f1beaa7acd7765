//! RunMatchUseCase: the turn-based match state machine.
//!
//! The [`MatchController`] owns the one [`MatchState`] of the kiosk.  It is
//! driven from outside by four kinds of input:
//!
//! | Input                      | Source                         |
//! |----------------------------|--------------------------------|
//! | `start_turn`, `confirm_handoff`, `new_match`, `reset` | operator commands |
//! | `on_bpm_reading`           | the sensor link                |
//! | `tick`                     | the one-second countdown       |
//! | `on_connection_established`, `on_link_lost` | link state changes |
//!
//! Every visible change is broadcast as a [`MatchEvent`].  Commands invoked
//! out of contract are rejected with a [`ControllerErrorKind`], logged as a
//! warning, and leave the state untouched.
//!
//! # Score rule (for beginners)
//!
//! While a player is recording, every BPM reading *overwrites* their score.
//! When the countdown reaches zero the last value is frozen.  There is no
//! averaging and no peak tracking.

use pulse_core::{
    BpmReading, ControllerErrorKind, MatchOutcome, MatchPhase, MatchState, PlayerId,
    PlayerProfile, WinRule, DEFAULT_TURN_SECONDS,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Buffered match events per subscriber.
const MATCH_EVENT_CAPACITY: usize = 256;

/// Fixed rules for every match played by this controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRules {
    pub turn_seconds: u32,
    pub win_rule: WinRule,
}

impl MatchRules {
    /// A zero-length turn is raised to one second.
    pub fn new(turn_seconds: u32, win_rule: WinRule) -> Self {
        Self {
            turn_seconds: turn_seconds.max(1),
            win_rule,
        }
    }
}

impl Default for MatchRules {
    fn default() -> Self {
        Self::new(DEFAULT_TURN_SECONDS, WinRule::default())
    }
}

/// Notifications emitted by the controller, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    PhaseChanged(MatchPhase),
    /// Every reading is forwarded, recorded or not, so the UI can show a
    /// live value before the turn starts.
    BpmReading {
        value: u16,
        in_normal_band: bool,
        recorded_for: Option<PlayerId>,
    },
    TurnStarted {
        player: PlayerId,
        seconds: u32,
    },
    TurnTick {
        player: PlayerId,
        remaining_seconds: u32,
    },
    TurnEnded {
        player: PlayerId,
        final_score: u16,
    },
    /// The link dropped mid-turn.  The score was discarded.
    TurnAborted {
        player: PlayerId,
        remaining_seconds: u32,
    },
    MatchComplete(MatchOutcome),
    CommandRejected(ControllerErrorKind),
}

/// Drives one match at a time through its phases.
pub struct MatchController {
    rules: MatchRules,
    state: MatchState,
    outcome: Option<MatchOutcome>,
    link_live: bool,
    events: broadcast::Sender<MatchEvent>,
}

impl MatchController {
    /// Creates an idle controller.
    ///
    /// Returns the controller and a receiver that observes every event from
    /// the start.  Call [`subscribe`](Self::subscribe) for more receivers.
    pub fn new(rules: MatchRules) -> (Self, broadcast::Receiver<MatchEvent>) {
        let (events, rx) = broadcast::channel(MATCH_EVENT_CAPACITY);
        let controller = Self {
            rules,
            state: MatchState::default(),
            outcome: None,
            link_live: false,
            events,
        };
        (controller, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn rules(&self) -> MatchRules {
        self.rules
    }

    /// The outcome of the last completed match, until `reset`.
    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.state.phase.recording_player().is_some()
    }

    /// Whether the controller believes the sensor link is up.
    pub fn is_link_live(&self) -> bool {
        self.link_live
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Begins a match for two registered players.
    ///
    /// Only valid from `Idle`.  If a link is already live the match goes
    /// straight to `Player1Ready`.
    pub fn new_match(&mut self, profiles: [PlayerProfile; 2]) -> Result<(), ControllerErrorKind> {
        if self.state.phase != MatchPhase::Idle {
            return Err(self.reject(ControllerErrorKind::InvalidPhase));
        }
        self.state = MatchState::new(profiles);
        self.outcome = None;
        info!(
            "new match {} ({})",
            self.state.match_id,
            self.state.match_label()
        );
        self.enter_waiting_or_ready();
        Ok(())
    }

    /// Starts a new match with the same two players after a `reset`.
    pub fn rematch(&mut self) -> Result<(), ControllerErrorKind> {
        let profiles = self.state.players.clone().map(|slot| slot.profile);
        self.new_match(profiles)
    }

    /// Records that the sensor link is up.
    ///
    /// From `WaitingForConnection` the match moves to the saved resume phase,
    /// or `Player1Ready` for a fresh match.
    pub fn on_connection_established(&mut self) -> Result<(), ControllerErrorKind> {
        let was_live = self.link_live;
        self.link_live = true;
        match self.state.phase {
            MatchPhase::WaitingForConnection => {
                let next = self
                    .state
                    .resume_phase
                    .take()
                    .unwrap_or(MatchPhase::Player1Ready);
                self.set_phase(next);
                Ok(())
            }
            MatchPhase::Idle => Ok(()),
            _ if was_live => Err(self.reject(ControllerErrorKind::AlreadyConnected)),
            _ => Ok(()),
        }
    }

    /// Starts `player`'s turn by its 1-based number.
    pub fn start_turn_number(&mut self, number: u8) -> Result<(), ControllerErrorKind> {
        match PlayerId::try_from(number) {
            Ok(player) => self.start_turn(player),
            Err(kind) => Err(self.reject(kind)),
        }
    }

    /// Starts recording `player`.
    ///
    /// Rejections, checked in order:
    /// - a turn is already recording: `TurnAlreadyInProgress`
    /// - no live link: `NotConnected`
    /// - it is not `player`'s ready phase: `InvalidPlayer`
    pub fn start_turn(&mut self, player: PlayerId) -> Result<(), ControllerErrorKind> {
        if self.state.recording_count() > 0 {
            return Err(self.reject(ControllerErrorKind::TurnAlreadyInProgress));
        }
        if !self.link_live || self.state.phase == MatchPhase::WaitingForConnection {
            return Err(self.reject(ControllerErrorKind::NotConnected));
        }
        if self.state.phase.ready_player() != Some(player) {
            return Err(self.reject(ControllerErrorKind::InvalidPlayer));
        }

        let seconds = self.rules.turn_seconds;
        let slot = self.state.slot_mut(player);
        slot.recording = true;
        slot.score = 0;
        self.state.active_player = Some(player);
        self.state.remaining_seconds = seconds;
        info!("{player} turn started ({seconds}s)");
        self.set_phase(MatchPhase::recording_for(player));
        self.emit(MatchEvent::TurnStarted { player, seconds });
        Ok(())
    }

    /// Moves from `Player1Done` to `Player2Ready` once player 2 has the sensor.
    pub fn confirm_handoff(&mut self) -> Result<(), ControllerErrorKind> {
        if self.state.phase != MatchPhase::Player1Done {
            return Err(self.reject(ControllerErrorKind::InvalidPhase));
        }
        self.set_phase(MatchPhase::Player2Ready);
        Ok(())
    }

    /// Returns to `Idle`, clearing scores, recording flags and the outcome.
    pub fn reset(&mut self) {
        self.state.reset();
        self.outcome = None;
        info!("match reset");
        self.emit(MatchEvent::PhaseChanged(MatchPhase::Idle));
    }

    // ── Link and clock inputs ─────────────────────────────────────────────────

    /// Overwrites the recording player's score with `reading`.
    ///
    /// Outside a turn the reading is only forwarded for display.
    pub fn on_bpm_reading(&mut self, reading: BpmReading) {
        let recorded_for = self.state.phase.recording_player();
        if let Some(player) = recorded_for {
            self.state.slot_mut(player).score = reading.value;
        }
        self.emit(MatchEvent::BpmReading {
            value: reading.value,
            in_normal_band: reading.is_within_normal_band(),
            recorded_for,
        });
    }

    /// Advances the countdown by one second.
    ///
    /// Ignored when no turn is recording.  At zero the score is frozen and
    /// the turn ends; after player 2 the outcome is computed.
    pub fn tick(&mut self) {
        let Some(player) = self.state.phase.recording_player() else {
            debug!("tick ignored in {:?}", self.state.phase);
            return;
        };
        self.state.remaining_seconds = self.state.remaining_seconds.saturating_sub(1);
        let remaining_seconds = self.state.remaining_seconds;
        self.emit(MatchEvent::TurnTick {
            player,
            remaining_seconds,
        });
        if remaining_seconds == 0 {
            self.end_turn(player);
        }
    }

    /// Handles loss of the sensor link.
    ///
    /// A recording turn is aborted and its score discarded; the player gets
    /// a fresh turn once the link is back.  Any other in-match phase is
    /// remembered and the match waits for a connection.
    pub fn on_link_lost(&mut self) {
        self.link_live = false;
        let phase = self.state.phase;
        if !phase.requires_link() {
            return;
        }

        let resume = match phase.recording_player() {
            Some(player) => {
                let remaining_seconds = self.state.remaining_seconds;
                self.state.slot_mut(player).clear();
                self.state.active_player = None;
                self.state.remaining_seconds = 0;
                warn!("{player} turn aborted with {remaining_seconds}s left: sensor link lost");
                self.emit(MatchEvent::TurnAborted {
                    player,
                    remaining_seconds,
                });
                MatchPhase::ready_for(player)
            }
            None => phase,
        };
        self.state.resume_phase = Some(resume);
        self.set_phase(MatchPhase::WaitingForConnection);
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn end_turn(&mut self, player: PlayerId) {
        let slot = self.state.slot_mut(player);
        slot.recording = false;
        let final_score = slot.score;
        self.state.active_player = None;
        info!("{player} turn ended, score {final_score}");
        self.emit(MatchEvent::TurnEnded {
            player,
            final_score,
        });

        match player {
            PlayerId::One => self.set_phase(MatchPhase::Player1Done),
            PlayerId::Two => {
                self.set_phase(MatchPhase::MatchComplete);
                let outcome = MatchOutcome::determine(&self.state, self.rules.win_rule);
                info!(
                    "match {} complete: scores {:?}, any winner: {}",
                    self.state.match_id,
                    self.state.scores(),
                    outcome.any_winner
                );
                self.outcome = Some(outcome.clone());
                self.emit(MatchEvent::MatchComplete(outcome));
            }
        }
    }

    fn enter_waiting_or_ready(&mut self) {
        if self.link_live {
            self.set_phase(MatchPhase::Player1Ready);
        } else {
            self.set_phase(MatchPhase::WaitingForConnection);
        }
    }

    fn set_phase(&mut self, next: MatchPhase) {
        debug!("match phase {:?} -> {next:?}", self.state.phase);
        self.state.phase = next;
        self.emit(MatchEvent::PhaseChanged(next));
    }

    fn reject(&self, kind: ControllerErrorKind) -> ControllerErrorKind {
        warn!("command rejected in {:?}: {kind}", self.state.phase);
        self.emit(MatchEvent::CommandRejected(kind));
        kind
    }

    fn emit(&self, event: MatchEvent) {
        let _ = self.events.send(event);
    }
}
