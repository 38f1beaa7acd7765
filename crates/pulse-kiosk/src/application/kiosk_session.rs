//! KioskSession: the single event loop that runs the kiosk.
//!
//! Three inputs are multiplexed with `tokio::select!`:
//!
//! ```text
//!   operator commands (mpsc) ─┐
//!   link events (broadcast)  ─┼─► KioskSession ─► MatchController
//!   countdown (1 s interval) ─┘        │
//!                                      └─► KioskEvent broadcast ─► UI
//! ```
//!
//! Everything the match controller does happens on this one task, so the
//! match state needs no locking.  The countdown interval only exists while a
//! turn is recording and is dropped the moment the turn ends or aborts.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{
    ConnectErrorKind, ConnectionState, ControllerErrorKind, LinkErrorKind, MatchPhase,
    MatchRecord, PlayerProfile,
};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::finish_match::{
    MatchFinisher, NavigationTarget, PersistenceError, ResultStore, SaveStatus,
};
use super::link::{BpmLink, LinkEvent};
use super::run_match::{MatchController, MatchEvent, MatchRules};

/// Countdown resolution.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Buffered kiosk events per subscriber.
const KIOSK_EVENT_CAPACITY: usize = 512;

/// Default number of leaderboard rows returned by `ShowLeaderboard`.
pub const DEFAULT_LEADERBOARD_SIZE: usize = 10;

/// Operator commands accepted by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KioskCommand {
    NewMatch([PlayerProfile; 2]),
    Connect,
    /// Releases the current link (if any) and connects again.
    Reconnect,
    Disconnect,
    /// Starts the turn of player 1 or 2.
    StartTurn(u8),
    ConfirmHandoff,
    /// Saves the results, then navigates.
    Navigate(NavigationTarget),
    /// Navigates without saving.
    SkipSave(NavigationTarget),
    /// Plays the match again with the same players.  Nothing is saved.
    Retry,
    ShowLeaderboard,
    Shutdown,
}

/// Everything the presentation layer needs to render the kiosk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KioskEvent {
    ConnectionChanged(ConnectionState),
    ConnectFailed(ConnectErrorKind),
    LinkFault(LinkErrorKind),
    Match(MatchEvent),
    ResultsSaved,
    PersistenceFailed(PersistenceError),
    NavigationRequested {
        target: NavigationTarget,
        saved: bool,
    },
    Leaderboard(Vec<MatchRecord>),
}

enum Step {
    Command(Option<KioskCommand>),
    Link(Result<LinkEvent, RecvError>),
    Tick,
}

/// Owns the link, the match controller, and the finisher.
pub struct KioskSession {
    link: Box<dyn BpmLink>,
    controller: MatchController,
    match_rx: broadcast::Receiver<MatchEvent>,
    finisher: MatchFinisher,
    events: broadcast::Sender<KioskEvent>,
    countdown: Option<Interval>,
    leaderboard_size: usize,
}

impl KioskSession {
    pub fn new(link: Box<dyn BpmLink>, rules: MatchRules, store: Arc<dyn ResultStore>) -> Self {
        let (controller, match_rx) = MatchController::new(rules);
        let (events, _) = broadcast::channel(KIOSK_EVENT_CAPACITY);
        Self {
            link,
            controller,
            match_rx,
            finisher: MatchFinisher::new(store),
            events,
            countdown: None,
            leaderboard_size: DEFAULT_LEADERBOARD_SIZE,
        }
    }

    pub fn with_leaderboard_size(mut self, size: usize) -> Self {
        self.leaderboard_size = size;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KioskEvent> {
        self.events.subscribe()
    }

    pub fn controller(&self) -> &MatchController {
        &self.controller
    }

    pub fn link_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn save_status(&self) -> SaveStatus {
        self.finisher.status()
    }

    /// Runs until `Shutdown` is received or the command channel closes.
    ///
    /// The link is released before returning.  The session is handed back
    /// so callers can inspect the final state.
    pub async fn run(mut self, mut commands: mpsc::Receiver<KioskCommand>) -> Self {
        let mut link_rx = self.link.subscribe();
        info!("kiosk session started");

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = link_rx.recv() => Step::Link(event),
                _ = next_tick(&mut self.countdown) => Step::Tick,
            };

            match step {
                Step::Command(None) | Step::Command(Some(KioskCommand::Shutdown)) => break,
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Link(Ok(event)) => self.handle_link_event(event),
                Step::Link(Err(RecvError::Lagged(skipped))) => {
                    warn!("session fell behind the link; {skipped} events skipped");
                    self.resync_link();
                }
                Step::Link(Err(RecvError::Closed)) => {
                    warn!("link event stream closed");
                    break;
                }
                Step::Tick => self.handle_tick(),
            }
            self.forward_match_events();
        }

        self.countdown = None;
        self.link.disconnect().await;
        self.controller.on_link_lost();
        self.forward_match_events();
        info!("kiosk session stopped");
        self
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: KioskCommand) {
        debug!("command {command:?}");
        match command {
            KioskCommand::NewMatch(profiles) => {
                if self.controller.new_match(profiles).is_ok() {
                    self.finisher.reset();
                }
            }
            KioskCommand::Connect => self.connect().await,
            KioskCommand::Reconnect => {
                self.link.disconnect().await;
                self.connect().await;
            }
            KioskCommand::Disconnect => self.link.disconnect().await,
            KioskCommand::StartTurn(number) => {
                if self.controller.start_turn_number(number).is_ok() {
                    self.arm_countdown();
                }
            }
            KioskCommand::ConfirmHandoff => {
                let _ = self.controller.confirm_handoff();
            }
            KioskCommand::Navigate(target) => self.navigate(target, true).await,
            KioskCommand::SkipSave(target) => self.navigate(target, false).await,
            KioskCommand::Retry => self.retry(),
            KioskCommand::ShowLeaderboard => self.show_leaderboard().await,
            KioskCommand::Shutdown => {}
        }
    }

    async fn connect(&mut self) {
        if self.link.state() == ConnectionState::Lost {
            info!("releasing lost link before reconnecting");
            self.link.disconnect().await;
        }
        match self.link.request_connection().await {
            Ok(handle) => {
                info!("connected to {}", handle.port_name);
                self.link.start_reading(handle);
            }
            Err(kind) => {
                warn!("connection failed: {kind}");
                self.publish(KioskEvent::ConnectFailed(kind));
            }
        }
    }

    async fn navigate(&mut self, target: NavigationTarget, save_first: bool) {
        let Some(outcome) = self.controller.outcome().cloned() else {
            self.reject(ControllerErrorKind::InvalidPhase);
            return;
        };
        if target == NavigationTarget::Photobooth && !outcome.any_winner {
            self.reject(ControllerErrorKind::InvalidPhase);
            return;
        }

        if save_first {
            match self.finisher.save(self.controller.state(), &outcome).await {
                Ok(()) => self.publish(KioskEvent::ResultsSaved),
                Err(e) => {
                    self.publish(KioskEvent::PersistenceFailed(e));
                    return;
                }
            }
        }

        let saved = self.finisher.status() == SaveStatus::Saved;
        if !saved {
            warn!("leaving match {} without saving", self.controller.state().match_id);
        }
        info!("navigating to {target:?}");
        self.publish(KioskEvent::NavigationRequested { target, saved });
        self.controller.reset();
        self.finisher.reset();
    }

    fn retry(&mut self) {
        if self.controller.state().phase != MatchPhase::MatchComplete {
            self.reject(ControllerErrorKind::InvalidPhase);
            return;
        }
        self.countdown = None;
        self.controller.reset();
        self.finisher.reset();
        let _ = self.controller.rematch();
    }

    async fn show_leaderboard(&mut self) {
        match self.finisher.store().top_n(self.leaderboard_size).await {
            Ok(rows) => self.publish(KioskEvent::Leaderboard(rows)),
            Err(e) => warn!("could not load leaderboard: {e}"),
        }
    }

    // ── Link and clock ────────────────────────────────────────────────────────

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::StateChanged(state) => {
                self.publish(KioskEvent::ConnectionChanged(state));
                match state {
                    ConnectionState::Connected => {
                        let _ = self.controller.on_connection_established();
                    }
                    ConnectionState::Lost | ConnectionState::Disconnected => {
                        self.countdown = None;
                        self.controller.on_link_lost();
                    }
                    ConnectionState::Connecting => {}
                }
            }
            LinkEvent::Reading(reading) => {
                if !reading.is_within_normal_band() {
                    warn!("bpm {} is outside the normal band", reading.value);
                }
                self.controller.on_bpm_reading(reading);
            }
            LinkEvent::Fault(kind) => self.publish(KioskEvent::LinkFault(kind)),
        }
    }

    /// Catches the controller up with the link after skipped events.
    ///
    /// A skipped `Connected` or `Lost` would otherwise leave the match
    /// waiting for a link that is up, or recording from one that is gone.
    fn resync_link(&mut self) {
        let state = self.link.state();
        let live = self.controller.is_link_live();
        match state {
            ConnectionState::Connected if !live => {
                info!("link is connected; resuming after skipped events");
                self.publish(KioskEvent::ConnectionChanged(state));
                let _ = self.controller.on_connection_established();
            }
            ConnectionState::Lost | ConnectionState::Disconnected if live => {
                info!("link is {state:?}; dropping it after skipped events");
                self.publish(KioskEvent::ConnectionChanged(state));
                self.countdown = None;
                self.controller.on_link_lost();
            }
            _ => {}
        }
    }

    fn handle_tick(&mut self) {
        self.controller.tick();
        if !self.controller.is_recording() {
            self.countdown = None;
        }
    }

    fn arm_countdown(&mut self) {
        let mut countdown = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.countdown = Some(countdown);
    }

    // ── Events ────────────────────────────────────────────────────────────────

    fn forward_match_events(&mut self) {
        loop {
            match self.match_rx.try_recv() {
                Ok(event) => self.publish(KioskEvent::Match(event)),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("{skipped} match events dropped before forwarding");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn reject(&mut self, kind: ControllerErrorKind) {
        warn!(
            "command rejected in {:?}: {kind}",
            self.controller.state().phase
        );
        self.publish(KioskEvent::Match(MatchEvent::CommandRejected(kind)));
    }

    fn publish(&self, event: KioskEvent) {
        let _ = self.events.send(event);
    }
}

/// Resolves on the next countdown tick, or never when no turn is running.
async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
