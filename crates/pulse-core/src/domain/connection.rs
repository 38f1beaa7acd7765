//! Connection lifecycle of the heart-rate link.
//!
//! ```text
//! Disconnected ──request──► Connecting ──open ok──► Connected
//!      ▲                        │                       │
//!      └──────open failed───────┘           end of stream / read fault
//!      │                                                ▼
//!      └────────────────explicit disconnect─────────── Lost
//! ```
//!
//! The link never reconnects on its own.  Recovery is always a new,
//! operator-initiated connection attempt.

use serde::{Deserialize, Serialize};

/// Current state of the sensor link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No port is open.
    #[default]
    Disconnected,
    /// A port was chosen and is being opened.
    Connecting,
    /// The read loop is running and readings are flowing.
    Connected,
    /// The stream ended or failed; waiting for an explicit disconnect.
    Lost,
}

impl ConnectionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Lost)
                | (Connected, Disconnected)
                | (Lost, Disconnected)
        )
    }

    /// Returns `true` while readings can arrive.
    pub fn is_live(self) -> bool {
        self == ConnectionState::Connected
    }
}
