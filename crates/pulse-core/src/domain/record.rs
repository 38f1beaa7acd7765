//! The leaderboard row written for each player when a match ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::match_state::MatchState;
use super::outcome::MatchOutcome;
use super::player::PlayerId;

/// One player's entry on the leaderboard.
///
/// Field names are camelCase on the wire because the leaderboard page reads
/// the same store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub name: String,
    pub score: u16,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub email: String,
    /// `"WIN"` or `"LOSE"`.
    pub status: String,
    /// `"<player 1> & <player 2>"`.
    pub match_label: String,
    pub timestamp: DateTime<Utc>,
}

impl MatchRecord {
    /// Builds both players' records from a completed match.
    ///
    /// Both records share `timestamp` so the pair sorts together.
    pub fn for_match(
        state: &MatchState,
        outcome: &MatchOutcome,
        timestamp: DateTime<Utc>,
    ) -> [MatchRecord; 2] {
        let label = state.match_label();
        PlayerId::ALL.map(|id| {
            let slot = state.slot(id);
            let result = outcome.result(id);
            MatchRecord {
                name: slot.profile.name.clone(),
                score: result.score,
                section: slot.profile.section.clone(),
                email: slot.profile.email.clone(),
                status: result.verdict.as_status().to_string(),
                match_label: label.clone(),
                timestamp,
            }
        })
    }
}
