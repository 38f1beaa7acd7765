//! Player identity and per-match slot.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::ControllerErrorKind;

/// Which of the two players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerId {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl PlayerId {
    /// Both players in turn order.
    pub const ALL: [PlayerId; 2] = [PlayerId::One, PlayerId::Two];

    /// The 1-based player number shown in the UI.
    pub fn number(self) -> u8 {
        match self {
            PlayerId::One => 1,
            PlayerId::Two => 2,
        }
    }

    /// Zero-based index into `[PlayerSlot; 2]`.
    pub fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl TryFrom<u8> for PlayerId {
    type Error = ControllerErrorKind;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(PlayerId::One),
            2 => Ok(PlayerId::Two),
            _ => Err(ControllerErrorKind::InvalidPlayer),
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player {}", self.number())
    }
}

/// Registration details entered before the match.
///
/// `section` and `email` are optional on the sign-up form and are stored as
/// empty strings when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub email: String,
}

impl PlayerProfile {
    /// A profile with only a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The fallback profile used when no name was registered.
    pub fn anonymous(id: PlayerId) -> Self {
        Self::named(id.to_string())
    }
}

/// One player's seat in a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSlot {
    pub id: PlayerId,
    pub profile: PlayerProfile,
    /// Last BPM recorded during this player's turn; frozen once it ends.
    pub score: u16,
    /// `true` only while this player's turn is counting down.
    pub recording: bool,
}

impl PlayerSlot {
    pub fn new(id: PlayerId, profile: PlayerProfile) -> Self {
        Self {
            id,
            profile,
            score: 0,
            recording: false,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.profile.name
    }

    /// Clears the score and recording flag, keeping the profile.
    pub fn clear(&mut self) {
        self.score = 0;
        self.recording = false;
    }
}
