//! # Observability
//!
//! Structured logging for the session service processes.
//!
//! Every process (daemon, supervisor, CLI) calls [`init_with_config`] once at
//! startup and then uses plain `tracing` macros. Log lines are written as JSONL
//! to a per-process file under the application's `logs/` directory, so the
//! daemon and its supervisor can be followed side by side:
//!
//! ```text
//! tail -f ~/.session-service/<app_id>/logs/session-daemon.jsonl | jq
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "session-daemon".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("service started");
//! ```

mod file;
mod json_layer;

pub use file::{CentralLogWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogEntry};

use std::path::PathBuf;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "session-daemon", "session-supervisor").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.session-service/logs/<service>.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Falls back to stderr-only logging when the log file cannot be opened, so a
/// read-only home directory never prevents a process from starting.
pub fn init_with_config(config: LogConfig) {
    file::init_file_subscriber(&config);
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
