//! Logging initialization.
//!
//! Wraps the observability crate so every process writes JSONL into the
//! application's own `logs/` directory under its service name.

use crate::Paths;

/// Initialize logging for one process of the application.
///
/// * `level` - Default log level (trace, debug, info, warn, error); `RUST_LOG` wins.
/// * `service_name` - Included in every log line (`session-daemon`, `session-supervisor`, ...).
/// * `also_stderr` - Mirror logs to stderr, used when running attached to a terminal.
pub fn init_logging(level: &str, service_name: &str, paths: &Paths, also_stderr: bool) {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string(),
        log_path: Some(paths.log_file(service_name)),
        also_stderr,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
