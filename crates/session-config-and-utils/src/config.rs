//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Delay before a relaunch requested on task removal.
pub const DEFAULT_RELAUNCH_DELAY_MS: u64 = 1_000;

/// How the supervisor (and auto-creating clients) start the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartModePreference {
    /// Let the host decide.
    #[default]
    Auto,
    /// Always start promoted to foreground.
    Foreground,
    /// Always start plain; promotion happens on first bind.
    Plain,
}

impl std::str::FromStr for StartModePreference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "foreground" => Ok(Self::Foreground),
            "plain" => Ok(Self::Plain),
            other => Err(CoreError::Config(format!("unknown start mode '{}'", other))),
        }
    }
}

/// Session service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Delay before the one-shot relaunch scheduled on task removal.
    #[serde(default = "default_relaunch_delay_ms")]
    pub relaunch_delay_ms: u64,
    /// Start mode used when (re)launching the daemon.
    #[serde(default)]
    pub start_mode: StartModePreference,
    /// Seal vault entries at rest. Disabling is only meant for debugging.
    #[serde(default = "default_vault_encryption")]
    pub vault_encryption: bool,
}

fn default_relaunch_delay_ms() -> u64 {
    DEFAULT_RELAUNCH_DELAY_MS
}

fn default_vault_encryption() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            relaunch_delay_ms: DEFAULT_RELAUNCH_DELAY_MS,
            start_mode: StartModePreference::Auto,
            vault_encryption: true,
        }
    }
}

impl Config {
    /// Load configuration from the app directory, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the app directory.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Relaunch delay as a `Duration`.
    pub fn relaunch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.relaunch_delay_ms)
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("SESSION_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(raw) = std::env::var("SESSION_RELAUNCH_DELAY_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.relaunch_delay_ms = ms,
                Err(e) => tracing::warn!(value = %raw, error = %e, "Ignoring SESSION_RELAUNCH_DELAY_MS"),
            }
        }
        if let Ok(raw) = std::env::var("SESSION_START_MODE") {
            match raw.parse::<StartModePreference>() {
                Ok(mode) => self.start_mode = mode,
                Err(e) => tracing::warn!(error = %e, "Ignoring SESSION_START_MODE"),
            }
        }
    }
}
