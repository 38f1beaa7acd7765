//! Infrastructure layer for the kiosk.
//!
//! Contains OS-facing adapters: the USB serial link, the simulated sensor,
//! file-system storage, and the console UI bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `pulse_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod read_task;
pub mod serial_link;
pub mod simulated_link;
pub mod storage;
pub mod ui_bridge;
