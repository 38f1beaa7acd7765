//! # pulse-core
//!
//! Shared library for the Pulse Battle kiosk containing the serial line
//! parser, the match domain model, and the error taxonomy surfaced to the UI.
//!
//! This crate has zero dependencies on serial ports, async runtimes, or UI
//! code.  It is used by the `pulse-kiosk` application crate.
//!
//! # Architecture overview (for beginners)
//!
//! Pulse Battle is a two-player game: each player holds a heart-rate sensor
//! for a 20-second turn, and whoever pushes their pulse to the target wins.
//! An Arduino prints lines such as `Signal: 512` and `BPM: 87` over a USB
//! serial link at 9600 baud.
//!
//! This crate (`pulse-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How raw serial text becomes [`BpmReading`]s.  A
//!   [`LineAssembler`] stitches transport chunks into whole lines, and
//!   [`parse_bpm`] extracts the labelled heart-rate value from each line.
//!
//! - **`domain`** – Pure game rules with no I/O: player slots, match phases,
//!   the win rule, the leaderboard record shape, and the error kinds every
//!   layer reports to the presentation sink.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `pulse_core::MatchState` instead of `pulse_core::domain::match_state::MatchState`.
pub use domain::connection::ConnectionState;
pub use domain::errors::{
    ConnectErrorKind, ControllerErrorKind, LinkErrorKind, PersistenceErrorKind,
};
pub use domain::match_state::{MatchPhase, MatchState, DEFAULT_TURN_SECONDS};
pub use domain::outcome::{FollowUp, MatchOutcome, PlayerResult, Verdict, WinRule};
pub use domain::player::{PlayerId, PlayerProfile, PlayerSlot};
pub use domain::record::MatchRecord;
pub use protocol::line_assembler::LineAssembler;
pub use protocol::line_parser::{parse_bpm, BpmReading, MAX_ACCEPTED_BPM, MIN_ACCEPTED_BPM};
