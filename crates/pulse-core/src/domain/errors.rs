//! Structured error kinds delivered to the presentation sink.
//!
//! Every failure the kiosk can report is one of these small enums.  The UI
//! decides how to present each kind (retry button, reconnect prompt, "not yet
//! saved" banner); the core never shows dialogs or navigates on its own.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a connection attempt failed.  Always recoverable by retrying.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectErrorKind {
    #[error("no port was selected")]
    NoPortSelected,
    #[error("selected port is not a recognised USB serial device")]
    InvalidPort,
    #[error("failed to open the port; is the sensor plugged in?")]
    OpenFailed,
    #[error("port is already in use by another application")]
    PortBusy,
    #[error("a link is already open; disconnect it first")]
    AlreadyConnected,
    #[error("unexpected connection error")]
    Unknown,
}

/// Why an established link stopped delivering readings.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkErrorKind {
    #[error("sensor stream ended; the device was unplugged")]
    StreamEnded,
    #[error("unrecoverable read error on the sensor stream")]
    ReadFault,
}

/// A match controller operation was invoked out of contract.
///
/// These are reported as warnings and leave the match untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerErrorKind {
    #[error("no live sensor link")]
    NotConnected,
    #[error("a turn is already recording")]
    TurnAlreadyInProgress,
    #[error("that player cannot start a turn now")]
    InvalidPlayer,
    #[error("connection was already established for this match")]
    AlreadyConnected,
    #[error("operation not valid in the current phase")]
    InvalidPhase,
}

/// A result store write failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceErrorKind {
    #[error("failed to save match results")]
    WriteFailed,
}
