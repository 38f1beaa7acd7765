//! Stdin command pump and the interactive port picker.
//!
//! Both read the same stdin and write through the sink's [`ConsoleWriter`].
//! While the picker is waiting for an answer, the next line goes to the
//! picker instead of the command parser:
//!
//! ```text
//! > connect
//! {"event":"portPrompt","ports":[{"name":"/dev/ttyACM0",...}]}
//! > 0                 <- routed to the picker, not parsed as a command
//! {"event":"connectionStateChanged","state":"connected"}
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::{parse_command, CommandResult, ConsoleCommand, ConsoleWriter, UiEvent, HELP};
use crate::application::kiosk_session::KioskCommand;
use crate::infrastructure::serial_link::{PortCandidate, PortPicker};

/// How long the picker waits for an answer before giving up.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// A single pending question waiting for the next console line.
#[derive(Debug, Clone, Default)]
pub struct PromptSlot {
    pending: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl PromptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a question.  A previous unanswered question is dropped.
    fn arm(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Hands `line` to a waiting question, or returns it if none is waiting.
    pub fn answer(&self, line: String) -> Result<(), String> {
        let waiting = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match waiting {
            Some(tx) => tx.send(line),
            None => Err(line),
        }
    }
}

/// Resolves an operator answer against the offered ports.
///
/// Accepts a list index or an exact port name.  Blank or `cancel` dismisses.
pub fn choose_port(candidates: &[PortCandidate], answer: &str) -> Option<PortCandidate> {
    let answer = answer.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("cancel") {
        return None;
    }
    if let Ok(index) = answer.parse::<usize>() {
        return candidates.get(index).cloned();
    }
    candidates.iter().find(|c| c.name == answer).cloned()
}

/// [`PortPicker`] that asks on the console.
pub struct ConsolePortPicker {
    prompt: PromptSlot,
    writer: ConsoleWriter,
    timeout: Duration,
}

impl ConsolePortPicker {
    pub fn new(prompt: PromptSlot, writer: ConsoleWriter) -> Self {
        Self {
            prompt,
            writer,
            timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PortPicker for ConsolePortPicker {
    async fn pick(&self, candidates: &[PortCandidate]) -> Option<PortCandidate> {
        if candidates.is_empty() {
            warn!("no serial ports found; is the sensor plugged in?");
            return None;
        }
        let answer = self.prompt.arm();
        let prompt = UiEvent::PortPrompt {
            ports: candidates.to_vec(),
        };
        if !self.writer.send(&prompt) {
            warn!("could not show port prompt: console output closed");
            return None;
        }

        match tokio::time::timeout(self.timeout, answer).await {
            Ok(Ok(line)) => choose_port(candidates, &line),
            Ok(Err(_)) => None,
            Err(_) => {
                info!("port prompt timed out");
                None
            }
        }
    }
}

/// Reads operator lines from `input` and forwards them.
///
/// Lines answer a pending [`PromptSlot`] question first; otherwise they are
/// parsed as commands.  Help text and parse errors go to `out` as
/// [`CommandResult`]s.  When `input` ends, the session is asked to shut down.
pub async fn run_command_pump<R>(
    input: R,
    out: ConsoleWriter,
    prompt: PromptSlot,
    commands: mpsc::Sender<KioskCommand>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = match prompt.answer(line) {
            Ok(()) => continue,
            Err(line) => line,
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(ConsoleCommand::Help) => {
                out.send(&CommandResult::ok(HELP));
            }
            Ok(ConsoleCommand::Kiosk(command)) => {
                let quit = command == KioskCommand::Shutdown;
                if commands.send(command).await.is_err() || quit {
                    return Ok(());
                }
            }
            Err(e) => {
                out.send(&CommandResult::<()>::err(e.to_string()));
            }
        }
    }

    info!("console input closed");
    let _ = commands.send(KioskCommand::Shutdown).await;
    Ok(())
}
