//! Match phases and the single authoritative state of one match.
//!
//! # Phase flow (for beginners)
//!
//! ```text
//! Idle ─new match─► WaitingForConnection ─link up─► Player1Ready
//!                          ▲                            │ start turn 1
//!                          │ link lost                  ▼
//!                          ├──────────────────── Player1Recording
//!                          │                            │ countdown hits 0
//!                          │                            ▼
//!                          │                       Player1Done
//!                          │                            │ handoff confirmed
//!                          │                            ▼
//!                          │                       Player2Ready
//!                          │                            │ start turn 2
//!                          │ link lost                  ▼
//!                          └──────────────────── Player2Recording
//!                                                       │ countdown hits 0
//!                                                       ▼
//!                                                 MatchComplete ─reset─► Idle
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::player::{PlayerId, PlayerProfile, PlayerSlot};

/// Length of one turn.
pub const DEFAULT_TURN_SECONDS: u32 = 20;

/// Where the match currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    #[default]
    Idle,
    WaitingForConnection,
    Player1Ready,
    Player1Recording,
    Player1Done,
    Player2Ready,
    Player2Recording,
    MatchComplete,
}

impl MatchPhase {
    /// The player allowed to start a turn in this phase, if any.
    pub fn ready_player(self) -> Option<PlayerId> {
        match self {
            MatchPhase::Player1Ready => Some(PlayerId::One),
            MatchPhase::Player2Ready => Some(PlayerId::Two),
            _ => None,
        }
    }

    /// The player whose turn is recording in this phase, if any.
    pub fn recording_player(self) -> Option<PlayerId> {
        match self {
            MatchPhase::Player1Recording => Some(PlayerId::One),
            MatchPhase::Player2Recording => Some(PlayerId::Two),
            _ => None,
        }
    }

    /// Phases in which a live link is required.
    pub fn requires_link(self) -> bool {
        !matches!(
            self,
            MatchPhase::Idle | MatchPhase::WaitingForConnection | MatchPhase::MatchComplete
        )
    }

    pub fn ready_for(player: PlayerId) -> Self {
        match player {
            PlayerId::One => MatchPhase::Player1Ready,
            PlayerId::Two => MatchPhase::Player2Ready,
        }
    }

    pub fn recording_for(player: PlayerId) -> Self {
        match player {
            PlayerId::One => MatchPhase::Player1Recording,
            PlayerId::Two => MatchPhase::Player2Recording,
        }
    }
}

/// The state of one match.
///
/// Exactly one instance exists per match.  It is created by the match
/// controller when a new match begins and cleared on reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchState {
    pub match_id: Uuid,
    pub phase: MatchPhase,
    /// Player whose turn is recording, if any.
    pub active_player: Option<PlayerId>,
    /// Seconds left in the current turn.  Only decreases during a turn.
    pub remaining_seconds: u32,
    pub players: [PlayerSlot; 2],
    /// Ready phase to return to once a lost link is re-established.
    pub resume_phase: Option<MatchPhase>,
}

impl MatchState {
    /// Creates an idle match with both slots seeded from `profiles`.
    pub fn new(profiles: [PlayerProfile; 2]) -> Self {
        let [p1, p2] = profiles;
        Self {
            match_id: Uuid::new_v4(),
            phase: MatchPhase::Idle,
            active_player: None,
            remaining_seconds: 0,
            players: [
                PlayerSlot::new(PlayerId::One, p1),
                PlayerSlot::new(PlayerId::Two, p2),
            ],
            resume_phase: None,
        }
    }

    pub fn slot(&self, id: PlayerId) -> &PlayerSlot {
        &self.players[id.index()]
    }

    pub fn slot_mut(&mut self, id: PlayerId) -> &mut PlayerSlot {
        &mut self.players[id.index()]
    }

    /// The slot currently recording, if any.
    pub fn recording_slot(&self) -> Option<&PlayerSlot> {
        self.players.iter().find(|slot| slot.recording)
    }

    /// Number of slots with `recording = true`.  Never more than one.
    pub fn recording_count(&self) -> usize {
        self.players.iter().filter(|slot| slot.recording).count()
    }

    /// Scores of player 1 and player 2.
    pub fn scores(&self) -> [u16; 2] {
        [self.players[0].score, self.players[1].score]
    }

    /// `"<player 1> & <player 2>"`, stored with each leaderboard record.
    pub fn match_label(&self) -> String {
        format!(
            "{} & {}",
            self.players[0].display_name(),
            self.players[1].display_name()
        )
    }

    /// Returns to `Idle`, clearing both scores and recording flags.
    pub fn reset(&mut self) {
        self.phase = MatchPhase::Idle;
        self.active_player = None;
        self.remaining_seconds = 0;
        self.resume_phase = None;
        for slot in &mut self.players {
            slot.clear();
        }
    }
}

impl Default for MatchState {
    fn default() -> Self {
        Self::new([
            PlayerProfile::anonymous(PlayerId::One),
            PlayerProfile::anonymous(PlayerId::Two),
        ])
    }
}
