//! Win rules and the match outcome.
//!
//! Two rules have existed for this game:
//!
//! - **Threshold** (canonical): every player whose frozen score reaches the
//!   target (100 BPM by default) wins.  Both players may win.
//! - **Lowest BPM**: the calmer player wins.  An exact tie is a double win.
//!   A player with no recorded reading (score 0) never wins.
//!
//! The rule is chosen once through configuration; the two are never mixed.

use serde::{Deserialize, Serialize};

use super::match_state::MatchState;
use super::player::PlayerId;

/// Default target for [`WinRule::Threshold`].
pub const DEFAULT_WIN_THRESHOLD: u16 = 100;

/// How a finished match is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum WinRule {
    /// A score `>= target` wins.
    Threshold { target: u16 },
    /// The lower non-zero score wins.
    LowestBpm,
}

impl Default for WinRule {
    fn default() -> Self {
        WinRule::Threshold {
            target: DEFAULT_WIN_THRESHOLD,
        }
    }
}

impl WinRule {
    /// Verdicts for player 1 and player 2.
    pub fn verdicts(self, scores: [u16; 2]) -> [Verdict; 2] {
        match self {
            WinRule::Threshold { target } => scores.map(|s| Verdict::from_win(s >= target)),
            WinRule::LowestBpm => {
                let [p1, p2] = scores;
                match (p1, p2) {
                    (0, 0) => [Verdict::Lose, Verdict::Lose],
                    (0, _) => [Verdict::Lose, Verdict::Win],
                    (_, 0) => [Verdict::Win, Verdict::Lose],
                    _ => [Verdict::from_win(p1 <= p2), Verdict::from_win(p2 <= p1)],
                }
            }
        }
    }
}

/// Whether one player won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Win,
    Lose,
}

impl Verdict {
    fn from_win(won: bool) -> Self {
        if won {
            Verdict::Win
        } else {
            Verdict::Lose
        }
    }

    /// `"WIN"` or `"LOSE"`, the status column of the leaderboard.
    pub fn as_status(self) -> &'static str {
        match self {
            Verdict::Win => "WIN",
            Verdict::Lose => "LOSE",
        }
    }
}

/// Which set of follow-up actions the UI offers after the match.
///
/// Both sets also include "home".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUp {
    /// At least one player won: offer the photobooth.
    Photobooth,
    /// Nobody won: offer a retry.
    Retry,
}

/// One player's final result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub player: PlayerId,
    pub name: String,
    pub score: u16,
    pub verdict: Verdict,
}

/// The outcome computed when a match completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub results: [PlayerResult; 2],
    pub any_winner: bool,
    pub follow_up: FollowUp,
}

impl MatchOutcome {
    /// Scores `state` under `rule`.
    pub fn determine(state: &MatchState, rule: WinRule) -> Self {
        let verdicts = rule.verdicts(state.scores());
        let results = PlayerId::ALL.map(|id| {
            let slot = state.slot(id);
            PlayerResult {
                player: id,
                name: slot.display_name().to_string(),
                score: slot.score,
                verdict: verdicts[id.index()],
            }
        });
        let any_winner = verdicts.contains(&Verdict::Win);
        Self {
            results,
            any_winner,
            follow_up: if any_winner {
                FollowUp::Photobooth
            } else {
                FollowUp::Retry
            },
        }
    }

    pub fn result(&self, id: PlayerId) -> &PlayerResult {
        &self.results[id.index()]
    }
}
