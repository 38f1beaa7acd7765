//! Console bridge: renders kiosk events as JSON lines and parses operator
//! commands typed on stdin.
//!
//! The kiosk front end (leaderboard page, photobooth, battle screen) runs as
//! a separate program.  It reads one JSON object per line from our stdout and
//! writes plain-text commands to our stdin.  This module is the only place
//! that knows that wire shape; it must NOT be imported by the application
//! layer.
//!
//! # Data Transfer Objects
//!
//! [`UiEvent`] mirrors [`KioskEvent`] with a stable, flat JSON form:
//!
//! ```text
//! {"event":"turnTick","player":"1","remainingSeconds":12}
//! {"event":"commandRejected","error":"turn_already_in_progress","message":"a turn is already recording"}
//! ```
//!
//! # `CommandResult<T>` wrapper
//!
//! Responses to console input that are not kiosk events (help text, parse
//! errors) use `{ success, data, error }` so the front end can tell them
//! apart from events without a try/catch.
//!
//! # One writer
//!
//! Only [`run_console_sink`] writes to stdout.  Command replies and the port
//! prompt are handed to it through a [`ConsoleWriter`], so JSON lines from
//! different sources never interleave.

pub mod console;

use pulse_core::{
    ConnectErrorKind, ConnectionState, ControllerErrorKind, LinkErrorKind, MatchOutcome,
    MatchPhase, MatchRecord, PersistenceErrorKind, PlayerId, PlayerProfile,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::warn;

use crate::application::finish_match::NavigationTarget;
use crate::application::kiosk_session::{KioskCommand, KioskEvent};
use crate::application::run_match::MatchEvent;
use crate::infrastructure::serial_link::PortCandidate;

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// One line of the console event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UiEvent {
    ConnectionStateChanged {
        state: ConnectionState,
    },
    ConnectFailed {
        error: ConnectErrorKind,
        message: String,
    },
    LinkFault {
        error: LinkErrorKind,
        message: String,
    },
    PortPrompt {
        ports: Vec<PortCandidate>,
    },
    PhaseChanged {
        phase: MatchPhase,
    },
    BpmReading {
        value: u16,
        in_normal_band: bool,
        recording_player: Option<PlayerId>,
    },
    TurnStarted {
        player: PlayerId,
        seconds: u32,
    },
    TurnTick {
        player: PlayerId,
        remaining_seconds: u32,
    },
    TurnEnded {
        player: PlayerId,
        final_score: u16,
    },
    TurnAborted {
        player: PlayerId,
        remaining_seconds: u32,
    },
    MatchComplete {
        outcome: MatchOutcome,
    },
    CommandRejected {
        error: ControllerErrorKind,
        message: String,
    },
    ResultsSaved,
    PersistenceFailed {
        error: PersistenceErrorKind,
        message: String,
    },
    NavigationRequested {
        target: NavigationTarget,
        saved: bool,
    },
    Leaderboard {
        entries: Vec<MatchRecord>,
    },
}

impl From<&MatchEvent> for UiEvent {
    fn from(event: &MatchEvent) -> Self {
        match event {
            MatchEvent::PhaseChanged(phase) => UiEvent::PhaseChanged { phase: *phase },
            MatchEvent::BpmReading {
                value,
                in_normal_band,
                recorded_for,
            } => UiEvent::BpmReading {
                value: *value,
                in_normal_band: *in_normal_band,
                recording_player: *recorded_for,
            },
            MatchEvent::TurnStarted { player, seconds } => UiEvent::TurnStarted {
                player: *player,
                seconds: *seconds,
            },
            MatchEvent::TurnTick {
                player,
                remaining_seconds,
            } => UiEvent::TurnTick {
                player: *player,
                remaining_seconds: *remaining_seconds,
            },
            MatchEvent::TurnEnded {
                player,
                final_score,
            } => UiEvent::TurnEnded {
                player: *player,
                final_score: *final_score,
            },
            MatchEvent::TurnAborted {
                player,
                remaining_seconds,
            } => UiEvent::TurnAborted {
                player: *player,
                remaining_seconds: *remaining_seconds,
            },
            MatchEvent::MatchComplete(outcome) => UiEvent::MatchComplete {
                outcome: outcome.clone(),
            },
            MatchEvent::CommandRejected(kind) => UiEvent::CommandRejected {
                error: *kind,
                message: kind.to_string(),
            },
        }
    }
}

impl From<&KioskEvent> for UiEvent {
    fn from(event: &KioskEvent) -> Self {
        match event {
            KioskEvent::ConnectionChanged(state) => UiEvent::ConnectionStateChanged { state: *state },
            KioskEvent::ConnectFailed(kind) => UiEvent::ConnectFailed {
                error: *kind,
                message: kind.to_string(),
            },
            KioskEvent::LinkFault(kind) => UiEvent::LinkFault {
                error: *kind,
                message: kind.to_string(),
            },
            KioskEvent::Match(event) => UiEvent::from(event),
            KioskEvent::ResultsSaved => UiEvent::ResultsSaved,
            KioskEvent::PersistenceFailed(e) => UiEvent::PersistenceFailed {
                error: e.kind,
                message: e.message.clone(),
            },
            KioskEvent::NavigationRequested { target, saved } => UiEvent::NavigationRequested {
                target: *target,
                saved: *saved,
            },
            KioskEvent::Leaderboard(entries) => UiEvent::Leaderboard {
                entries: entries.clone(),
            },
        }
    }
}

/// Unified response wrapper for console input that is not a kiosk event.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Command parsing ───────────────────────────────────────────────────────────

/// Console commands, one per line.
pub const HELP: &[&str] = &[
    "new <p1>[|section|email], <p2>[|section|email]",
    "                             register a match",
    "connect                      choose the sensor port and connect",
    "reconnect                    release the port and connect again",
    "disconnect                   release the port",
    "start <1|2>                  start a player's turn",
    "handoff                      player 2 has the sensor",
    "photobooth | home            save results and leave the result screen",
    "skip-save <photobooth|home>  leave without saving",
    "retry                        play again with the same players",
    "leaderboard                  show the top scores",
    "quit                         stop the kiosk",
];

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Kiosk(KioskCommand),
    Help,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}`; type `help`")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// `name[|section|email]`; missing fields are empty.
fn parse_profile(field: &str) -> Option<PlayerProfile> {
    let mut parts = field.split('|').map(str::trim);
    let name = parts.next().filter(|name| !name.is_empty())?;
    let profile = PlayerProfile {
        name: name.to_string(),
        section: parts.next().unwrap_or_default().to_string(),
        email: parts.next().unwrap_or_default().to_string(),
    };
    // More than three fields is a typo, not extra data.
    match parts.next() {
        Some(_) => None,
        None => Some(profile),
    }
}

fn parse_target(word: &str) -> Option<NavigationTarget> {
    match word {
        "photobooth" => Some(NavigationTarget::Photobooth),
        "home" => Some(NavigationTarget::Home),
        _ => None,
    }
}

/// Parses one line of operator input.
pub fn parse_command(line: &str) -> Result<ConsoleCommand, CommandError> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let verb = verb.to_ascii_lowercase();

    let command = match verb.as_str() {
        "help" | "?" => return Ok(ConsoleCommand::Help),
        "new" => {
            const USAGE: &str = "new <p1>[|section|email], <p2>[|section|email]";
            let (p1, p2) = rest
                .split_once(',')
                .and_then(|(a, b)| Some((parse_profile(a)?, parse_profile(b)?)))
                .ok_or(CommandError::Usage(USAGE))?;
            KioskCommand::NewMatch([p1, p2])
        }
        "connect" => KioskCommand::Connect,
        "reconnect" => KioskCommand::Reconnect,
        "disconnect" => KioskCommand::Disconnect,
        "start" => {
            let n = rest
                .parse::<u8>()
                .map_err(|_| CommandError::Usage("start <1|2>"))?;
            KioskCommand::StartTurn(n)
        }
        "handoff" => KioskCommand::ConfirmHandoff,
        "photobooth" | "home" => {
            let target = parse_target(&verb).ok_or_else(|| CommandError::Unknown(verb.clone()))?;
            KioskCommand::Navigate(target)
        }
        "skip-save" => {
            let target = parse_target(&rest.to_ascii_lowercase())
                .ok_or(CommandError::Usage("skip-save <photobooth|home>"))?;
            KioskCommand::SkipSave(target)
        }
        "retry" => KioskCommand::Retry,
        "leaderboard" | "top" => KioskCommand::ShowLeaderboard,
        "quit" | "exit" => KioskCommand::Shutdown,
        _ => return Err(CommandError::Unknown(verb)),
    };
    Ok(ConsoleCommand::Kiosk(command))
}

// ── Event sink ────────────────────────────────────────────────────────────────

/// Serializes `value` as one JSON line.
pub async fn write_json_line<W, T>(out: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}

/// Hands JSON lines to [`run_console_sink`] for writing.
#[derive(Debug, Clone)]
pub struct ConsoleWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl ConsoleWriter {
    /// A writer and the receiver the sink drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues `value` as one JSON line.  Returns `false` if it could not be
    /// serialized or the sink has stopped.
    pub fn send<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(line) => self.tx.send(line).is_ok(),
            Err(e) => {
                warn!("could not serialize console line: {e}");
                false
            }
        }
    }
}

enum SinkStep {
    Event(Result<KioskEvent, RecvError>),
    Board(Option<Vec<MatchRecord>>),
    Line(Option<String>),
}

async fn next_board(board: &mut Option<watch::Receiver<Vec<MatchRecord>>>) -> Option<Vec<MatchRecord>> {
    match board {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Writes every kiosk event, every leaderboard change if `board` is given,
/// and every line queued on a [`ConsoleWriter`] to `out` until the event
/// stream closes.
pub async fn run_console_sink<W>(
    mut events: broadcast::Receiver<KioskEvent>,
    mut board: Option<watch::Receiver<Vec<MatchRecord>>>,
    mut lines: mpsc::UnboundedReceiver<String>,
    mut out: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut lines_open = true;
    loop {
        let step = tokio::select! {
            event = events.recv() => SinkStep::Event(event),
            entries = next_board(&mut board) => SinkStep::Board(entries),
            line = lines.recv(), if lines_open => SinkStep::Line(line),
        };
        let ui = match step {
            SinkStep::Event(Ok(event)) => UiEvent::from(&event),
            SinkStep::Event(Err(RecvError::Lagged(skipped))) => {
                warn!("console fell behind; {skipped} events skipped");
                continue;
            }
            SinkStep::Event(Err(RecvError::Closed)) => break,
            SinkStep::Board(Some(entries)) => UiEvent::Leaderboard { entries },
            SinkStep::Board(None) => {
                board = None;
                continue;
            }
            SinkStep::Line(Some(mut line)) => {
                line.push('\n');
                out.write_all(line.as_bytes()).await?;
                out.flush().await?;
                continue;
            }
            SinkStep::Line(None) => {
                lines_open = false;
                continue;
            }
        };
        write_json_line(&mut out, &ui).await?;
    }
    Ok(())
}
