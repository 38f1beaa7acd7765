//! Domain entities for Pulse Battle.
//!
//! This module contains pure game rules with no infrastructure dependencies:
//! no serial ports, no timers, no files.  Everything here can be compiled and
//! tested on any machine without a sensor attached.
//!
//! Code in outer layers (the kiosk's application and infrastructure layers)
//! depends on these types, but the domain never depends on them.

/// Physical link lifecycle states.
pub mod connection;
/// Error kinds surfaced to the presentation sink.
pub mod errors;
/// Match phases and the authoritative per-match state.
pub mod match_state;
/// Win rules and the outcome computed when both turns are complete.
pub mod outcome;
/// Player identity, registration profile, and per-match slot.
pub mod player;
/// The leaderboard row written at the end of a match.
pub mod record;
