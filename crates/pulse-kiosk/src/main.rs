//! Pulse Battle kiosk binary.
//!
//! Runs one kiosk session on the console: operator commands are read from
//! stdin, one per line, and every event is written to stdout as a JSON line
//! for the front-end to render.  Logs go to stderr so stdout stays clean.
//!
//! # Usage
//!
//! ```text
//! pulse-kiosk [--config PATH] [--simulate] [--player1 NAME] [--player2 NAME]
//! pulse-kiosk [--config PATH] --write-config
//! ```
//!
//! `--write-config` saves the effective configuration (file values plus
//! defaults) to the config path and exits, giving operators a complete file
//! to edit.
//!
//! # Environment variable overrides
//!
//! | Variable         | CLI flag     | Default                        |
//! |------------------|--------------|--------------------------------|
//! | `PULSE_CONFIG`   | `--config`   | platform config dir            |
//! | `PULSE_SIMULATE` | `--simulate` | `false`                        |
//! | `RUST_LOG`       |              | `kiosk.log_level` from config  |
//!
//! Type `help` at the prompt for the command list.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pulse_core::PlayerProfile;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pulse_kiosk::application::finish_match::ResultStore;
use pulse_kiosk::application::kiosk_session::{KioskCommand, KioskSession};
use pulse_kiosk::application::link::BpmLink;
use pulse_kiosk::infrastructure::serial_link::native::NativeSerialBackend;
use pulse_kiosk::infrastructure::serial_link::SerialLinkManager;
use pulse_kiosk::infrastructure::simulated_link::SimulatedLink;
use pulse_kiosk::infrastructure::storage::config::{
    config_file_path, load_config, save_config, AppConfig,
};
use pulse_kiosk::infrastructure::storage::leaderboard::JsonlResultStore;
use pulse_kiosk::infrastructure::ui_bridge::console::{
    run_command_pump, ConsolePortPicker, PromptSlot,
};
use pulse_kiosk::infrastructure::ui_bridge::{run_console_sink, ConsoleWriter};

// ── CLI ───────────────────────────────────────────────────────────────────────

/// Two-player heart-rate game kiosk.
#[derive(Debug, Parser)]
#[command(
    name = "pulse-kiosk",
    about = "Two-player heart-rate game kiosk",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    ///
    /// When absent the platform config directory is used; a missing file
    /// means all defaults.
    #[arg(long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Use the simulated sensor instead of a serial port.
    #[arg(long, env = "PULSE_SIMULATE")]
    simulate: bool,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    write_config: bool,

    /// Player 1 name.  With both names given, a match is set up at startup.
    #[arg(long)]
    player1: Option<String>,

    /// Player 2 name.
    #[arg(long)]
    player2: Option<String>,

    #[arg(long, default_value = "")]
    section1: String,

    #[arg(long, default_value = "")]
    section2: String,

    #[arg(long, default_value = "")]
    email1: String,

    #[arg(long, default_value = "")]
    email2: String,
}

impl Cli {
    /// `--config`, or the platform config file.
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("cannot locate the config file"),
        }
    }

    /// The players named on the command line, if both were given.
    fn players(&self) -> Option<[PlayerProfile; 2]> {
        let (name1, name2) = (self.player1.as_ref()?, self.player2.as_ref()?);
        Some([
            PlayerProfile {
                name: name1.clone(),
                section: self.section1.clone(),
                email: self.email1.clone(),
            },
            PlayerProfile {
                name: name2.clone(),
                section: self.section2.clone(),
                email: self.email2.clone(),
            },
        ])
    }
}

fn init_logging(cfg: &AppConfig) {
    // `RUST_LOG` wins over the config file.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.kiosk.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and the config file is loaded.
/// 2. Logging is initialised.
/// 3. The leaderboard store and the sensor link (serial or simulated) are
///    built and handed to a [`KioskSession`].
/// 4. The console sink (the only stdout writer) and the command pump (stdin
///    to commands) are spawned.
/// 5. The session runs until `quit`, end of input, or Ctrl+C.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    init_logging(&cfg);

    if cli.write_config {
        let path = cli.config_path()?;
        save_config(&cfg, &path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("configuration written to {}", path.display());
        return Ok(());
    }

    // ── Persistence ───────────────────────────────────────────────────────────
    let board_path = cfg
        .kiosk
        .leaderboard_file()
        .context("cannot locate the leaderboard file")?;
    info!("leaderboard file: {}", board_path.display());
    let store = Arc::new(JsonlResultStore::new(board_path));

    // ── Sensor link ───────────────────────────────────────────────────────────
    let prompt = PromptSlot::new();
    let (writer, lines) = ConsoleWriter::channel();
    let link: Box<dyn BpmLink> = if cli.simulate {
        info!("using the simulated sensor");
        Box::new(SimulatedLink::new(cfg.simulator.settings()))
    } else {
        Box::new(SerialLinkManager::new(
            Arc::new(NativeSerialBackend::new(cfg.serial.read_timeout())),
            Arc::new(ConsolePortPicker::new(prompt.clone(), writer.clone())),
            cfg.serial.link_config(),
        ))
    };

    let session = KioskSession::new(link, cfg.game.match_rules(), store.clone())
        .with_leaderboard_size(cfg.kiosk.leaderboard_size);

    // ── Console I/O ───────────────────────────────────────────────────────────
    let board = match store.subscribe_top_n(cfg.kiosk.leaderboard_size).await {
        Ok(board) => Some(board),
        Err(e) => {
            warn!("live leaderboard unavailable: {e}");
            None
        }
    };
    let events = session.subscribe();
    tokio::spawn(async move {
        if let Err(e) = run_console_sink(events, board, lines, tokio::io::stdout()).await {
            error!("event output failed: {e}");
        }
    });

    let (tx, rx) = mpsc::channel(32);
    let pump_tx = tx.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = run_command_pump(stdin, writer, prompt, pump_tx).await {
            error!("command input failed: {e}");
        }
    });

    if let Some(players) = cli.players() {
        tx.send(KioskCommand::NewMatch(players)).await?;
        if cli.simulate {
            tx.send(KioskCommand::Connect).await?;
        }
    }

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                let _ = signal_tx.send(KioskCommand::Shutdown).await;
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });
    drop(tx);

    info!(
        "kiosk ready: {}s turns, win rule {:?}",
        cfg.game.turn_seconds, cfg.game.win_rule
    );
    let session = session.run(rx).await;
    info!("kiosk stopped (results {:?})", session.save_status());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
