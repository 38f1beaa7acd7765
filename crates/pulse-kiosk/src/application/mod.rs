//! Application layer use cases for the kiosk.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure game rules in `pulse-core`) and the infrastructure (serial ports,
//! files, the console).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a kiosk goal (e.g., "record
//!   player 1's heart rate for twenty seconds").
//! - **Depend on abstractions** ([`link::BpmLink`],
//!   [`finish_match::ResultStore`]) rather than concrete implementations, so
//!   a simulated sensor or an in-memory store can be swapped in.
//! - **Contain no OS calls and no file system access**.
//!
//! # Sub-modules
//!
//! - **`link`**          – The sensor link contract and its event stream.
//! - **`run_match`**     – The turn-based match state machine.
//! - **`finish_match`**  – Saves both results once, then hands off navigation.
//! - **`kiosk_session`** – The event loop tying link, countdown, commands and
//!   persistence together.

pub mod finish_match;
pub mod kiosk_session;
pub mod link;
pub mod run_match;
