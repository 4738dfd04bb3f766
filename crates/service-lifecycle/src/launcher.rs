//! Launching the daemon and supervisor as detached processes.

use crate::LifecycleError;
use session_config_and_utils::{AppIdentity, Paths, StartModePreference};
use std::io::ErrorKind;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming the daemon binary explicitly.
pub const DAEMON_BINARY_ENV: &str = "SESSION_DAEMON_BINARY";

const DAEMON_BINARY_NAME: &str = "session-daemon";

/// How a (re)launched daemon starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Promote to foreground immediately after start.
    Foreground,
    /// Start plain; promotion happens on the first bind.
    Plain,
}

impl StartMode {
    /// Resolve a configured preference on the current host.
    pub fn for_host(preference: StartModePreference) -> Self {
        match preference {
            StartModePreference::Foreground => StartMode::Foreground,
            StartModePreference::Plain => StartMode::Plain,
            StartModePreference::Auto => {
                if cfg!(target_os = "linux") {
                    StartMode::Foreground
                } else {
                    StartMode::Plain
                }
            }
        }
    }
}

/// Daemon binary candidates in lookup order.
pub fn daemon_binary_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(override_path) = std::env::var(DAEMON_BINARY_ENV) {
        if !override_path.trim().is_empty() {
            candidates.push(PathBuf::from(override_path));
        }
    }

    if let Ok(current_exe) = std::env::current_exe() {
        // Re-exec ourselves when we are the daemon binary.
        if current_exe.file_stem().and_then(|s| s.to_str()) == Some(DAEMON_BINARY_NAME) {
            candidates.push(current_exe.clone());
        }
        if let Some(parent) = current_exe.parent() {
            candidates.push(parent.join(DAEMON_BINARY_NAME));
            // cargo test binaries live one level below the build directory.
            if let Some(grandparent) = parent.parent() {
                candidates.push(grandparent.join(DAEMON_BINARY_NAME));
            }
        }
    }

    let mut unique = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.iter().any(|existing| existing == &candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// Spawns `session-daemon` subcommands for one application.
#[derive(Debug, Clone)]
pub struct ServiceLauncher {
    app_id: String,
    base_dir: PathBuf,
    log_level: Option<String>,
    candidates: Vec<PathBuf>,
}

impl ServiceLauncher {
    pub fn new(identity: &AppIdentity, paths: &Paths) -> Self {
        Self {
            app_id: identity.as_str().to_string(),
            base_dir: paths.base_dir().clone(),
            log_level: None,
            candidates: daemon_binary_candidates(),
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Use an explicit binary instead of the lookup list.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.candidates = vec![binary.into()];
        self
    }

    /// Start the session daemon.
    pub fn start_service(&self, mode: StartMode) -> Result<u32, LifecycleError> {
        let mut args = vec!["start".to_string()];
        if mode == StartMode::Foreground {
            args.push("--foreground".to_string());
        }
        info!(mode = ?mode, app_id = %self.app_id, "Launching session daemon");
        self.spawn_detached("session daemon", &args)
    }

    /// Start the restart supervisor.
    pub fn start_supervisor(&self) -> Result<u32, LifecycleError> {
        info!(app_id = %self.app_id, "Launching restart supervisor");
        self.spawn_detached("restart supervisor", &["supervise".to_string()])
    }

    fn spawn_detached(&self, what: &str, subcommand: &[String]) -> Result<u32, LifecycleError> {
        if self.candidates.is_empty() {
            return Err(LifecycleError::Spawn {
                what: what.to_string(),
                reason: "no daemon binary candidates".to_string(),
            });
        }

        let mut attempted = Vec::new();
        for binary in &self.candidates {
            attempted.push(binary.display().to_string());
            debug!(binary = %binary.display(), "Trying daemon binary candidate");

            let mut command = Command::new(binary);
            command
                .arg("--app-id")
                .arg(&self.app_id)
                .arg("--base-dir")
                .arg(&self.base_dir);
            if let Some(level) = &self.log_level {
                command.arg("--log-level").arg(level);
            }
            command
                .args(subcommand)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                // Own process group: the launcher's terminal signals must not reach it.
                .process_group(0);

            match command.spawn() {
                Ok(mut child) => {
                    let pid = child.id();
                    info!(pid, binary = %binary.display(), what, "Spawned detached process");
                    std::thread::spawn(move || {
                        let _ = child.wait();
                    });
                    return Ok(pid);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(binary = %binary.display(), error = %err, "Candidate failed to spawn");
                    return Err(LifecycleError::Spawn {
                        what: what.to_string(),
                        reason: format!("{}: {}", binary.display(), err),
                    });
                }
            }
        }

        Err(LifecycleError::Spawn {
            what: what.to_string(),
            reason: format!("no binary found (tried: {})", attempted.join(", ")),
        })
    }
}

/// Exponential backoff with a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

const BACKOFF_CAP_EXPONENT: u32 = 6;

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let shift = self.failures.min(BACKOFF_CAP_EXPONENT);
        self.failures = self.failures.saturating_add(1);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_explicit_start_modes_win() {
        assert_eq!(
            StartMode::for_host(StartModePreference::Foreground),
            StartMode::Foreground
        );
        assert_eq!(StartMode::for_host(StartModePreference::Plain), StartMode::Plain);
    }

    #[test]
    fn test_auto_start_mode_depends_on_host() {
        let expected = if cfg!(target_os = "linux") {
            StartMode::Foreground
        } else {
            StartMode::Plain
        };
        assert_eq!(StartMode::for_host(StartModePreference::Auto), expected);
    }

    #[test]
    fn test_candidates_are_unique() {
        let candidates = daemon_binary_candidates();
        for (i, a) in candidates.iter().enumerate() {
            assert!(!candidates[i + 1..].contains(a));
        }
    }

    #[test]
    fn test_missing_binary_is_a_spawn_error() {
        let dir = tempdir().unwrap();
        let identity = AppIdentity::new("com.example.app").unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let launcher =
            ServiceLauncher::new(&identity, &paths).with_binary(dir.path().join("no-such-binary"));

        let result = launcher.start_service(StartMode::Plain);
        assert!(matches!(result, Err(LifecycleError::Spawn { .. })));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.failures(), 4);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }
}
