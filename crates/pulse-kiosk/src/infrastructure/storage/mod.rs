//! Storage infrastructure: configuration and the leaderboard file.
//!
//! - `config`      reads and writes the TOML config from the platform
//!   config directory.
//! - `leaderboard` is the append-only result store the kiosk writes match
//!   records to.  It is a minimal stand-in for the hosted key-value store the
//!   leaderboard page reads; any [`ResultStore`] can replace it.
//!
//! [`ResultStore`]: crate::application::finish_match::ResultStore

pub mod config;
pub mod leaderboard;
