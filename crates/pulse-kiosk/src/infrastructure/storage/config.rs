//! TOML-based configuration for the kiosk.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\PulseBattle\config.toml`
//! - Linux:    `~/.config/pulsebattle/config.toml`
//! - macOS:    `~/Library/Application Support/PulseBattle/config.toml`
//!
//! A different file can be passed with `--config`.
//!
//! # Example
//!
//! ```toml
//! [kiosk]
//! log_level = "info"
//! leaderboard_size = 10
//!
//! [serial]
//! baud_rate = 9600
//! allowed_vendor_ids = [0x2341, 0x1a86]
//!
//! [game]
//! turn_seconds = 20
//! win_rule = "threshold"
//! win_threshold = 100
//!
//! [simulator]
//! min_bpm = 55
//! max_bpm = 120
//! tick_ms = 1000
//! ```
//!
//! # Serde default values
//!
//! Every section and field has a default, so an empty file (or no file at
//! all on first run) yields a working kiosk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pulse_core::{WinRule, DEFAULT_TURN_SECONDS, MAX_ACCEPTED_BPM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::kiosk_session::DEFAULT_LEADERBOARD_SIZE;
use crate::application::run_match::MatchRules;
use crate::infrastructure::serial_link::{SerialLinkConfig, DEFAULT_BAUD_RATE};
use crate::infrastructure::simulated_link::SimulatorSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parsed but make no sense together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level kiosk configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub kiosk: KioskConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// General kiosk behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KioskConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Leaderboard file.  Defaults to `leaderboard.jsonl` next to the config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaderboard_path: Option<PathBuf>,
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: usize,
}

/// Sensor port settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// USB vendor ids accepted by port validation.  Empty accepts any USB port.
    #[serde(default)]
    pub allowed_vendor_ids: Vec<u16>,
}

/// Which win rule a finished match is scored with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WinRuleName {
    #[default]
    Threshold,
    LowestBpm,
}

/// Match rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameConfig {
    #[serde(default = "default_turn_seconds")]
    pub turn_seconds: u32,
    #[serde(default)]
    pub win_rule: WinRuleName,
    /// Target for the `threshold` rule.
    #[serde(default = "default_win_threshold")]
    pub win_threshold: u16,
}

/// Settings for `--simulate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulatorConfig {
    #[serde(default = "default_min_bpm")]
    pub min_bpm: u16,
    #[serde(default = "default_max_bpm")]
    pub max_bpm: u16,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_leaderboard_size() -> usize {
    DEFAULT_LEADERBOARD_SIZE
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_turn_seconds() -> u32 {
    DEFAULT_TURN_SECONDS
}
fn default_win_threshold() -> u16 {
    100
}
fn default_min_bpm() -> u16 {
    55
}
fn default_max_bpm() -> u16 {
    120
}
fn default_tick_ms() -> u64 {
    1000
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            leaderboard_path: None,
            leaderboard_size: default_leaderboard_size(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            allowed_vendor_ids: Vec::new(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            turn_seconds: default_turn_seconds(),
            win_rule: WinRuleName::default(),
            win_threshold: default_win_threshold(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            min_bpm: default_min_bpm(),
            max_bpm: default_max_bpm(),
            tick_ms: default_tick_ms(),
            seed: None,
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Rejects values that parse but cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.game.turn_seconds == 0 {
            return Err(ConfigError::Invalid("game.turn_seconds must be at least 1".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be positive".into()));
        }
        if self.simulator.min_bpm == 0 || self.simulator.min_bpm > self.simulator.max_bpm {
            return Err(ConfigError::Invalid(format!(
                "simulator band {}..={} is empty or starts at 0",
                self.simulator.min_bpm, self.simulator.max_bpm
            )));
        }
        if self.simulator.max_bpm > MAX_ACCEPTED_BPM {
            return Err(ConfigError::Invalid(format!(
                "simulator.max_bpm {} is above the accepted {MAX_ACCEPTED_BPM}",
                self.simulator.max_bpm
            )));
        }
        if self.simulator.tick_ms == 0 {
            return Err(ConfigError::Invalid("simulator.tick_ms must be positive".into()));
        }
        Ok(())
    }
}

impl KioskConfig {
    /// The configured leaderboard file, or `leaderboard.jsonl` in the config dir.
    pub fn leaderboard_file(&self) -> Result<PathBuf, ConfigError> {
        match &self.leaderboard_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("leaderboard.jsonl")),
        }
    }
}

impl SerialConfig {
    pub fn link_config(&self) -> SerialLinkConfig {
        SerialLinkConfig {
            baud_rate: self.baud_rate,
            allowed_vendor_ids: self.allowed_vendor_ids.clone(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl GameConfig {
    pub fn win_rule(&self) -> WinRule {
        match self.win_rule {
            WinRuleName::Threshold => WinRule::Threshold {
                target: self.win_threshold,
            },
            WinRuleName::LowestBpm => WinRule::LowestBpm,
        }
    }

    pub fn match_rules(&self) -> MatchRules {
        MatchRules::new(self.turn_seconds, self.win_rule())
    }
}

impl SimulatorConfig {
    pub fn settings(&self) -> SimulatorSettings {
        SimulatorSettings {
            min_bpm: self.min_bpm,
            max_bpm: self.max_bpm,
            tick: Duration::from_millis(self.tick_ms),
            seed: self.seed,
            end_after: None,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path` (or the default location), returning
/// `AppConfig::default()` if the file does not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if the values fail validation.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    let cfg = match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(ConfigError::Io { path, source: e }),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Persists `config` to `path`, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("PulseBattle"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("pulsebattle"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("PulseBattle")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
