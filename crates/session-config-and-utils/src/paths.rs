//! File system paths for the session service.

use crate::{AppIdentity, CoreError, CoreResult};
use std::path::PathBuf;

/// Root directory name under the user's home.
const ROOT_DIR_NAME: &str = ".session-service";
/// Daemon socket filename under the app directory.
const DAEMON_SOCKET_NAME: &str = "daemon.sock";
/// Supervisor socket filename under the app directory.
const SUPERVISOR_SOCKET_NAME: &str = "supervisor.sock";

/// Manages file system paths for one application.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Per-application directory (~/.session-service/<app_id>)
    base_dir: PathBuf,
}

impl Paths {
    /// Paths for the given application under `~/.session-service/<app_id>`.
    pub fn for_app(identity: &AppIdentity) -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(ROOT_DIR_NAME).join(identity.as_str()),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Sealed token vault.
    pub fn vault_file(&self) -> PathBuf {
        self.base_dir.join("vault.json")
    }

    /// Vault key material (0600).
    pub fn vault_key_file(&self) -> PathBuf {
        self.base_dir.join("vault.key")
    }

    /// Lock file guarding cross-process vault access.
    pub fn vault_lock_file(&self) -> PathBuf {
        self.base_dir.join("vault.lock")
    }

    pub fn socket_file(&self) -> PathBuf {
        self.base_dir.join(DAEMON_SOCKET_NAME)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.base_dir.join("daemon.pid")
    }

    pub fn supervisor_socket_file(&self) -> PathBuf {
        self.base_dir.join(SUPERVISOR_SOCKET_NAME)
    }

    pub fn supervisor_pid_file(&self) -> PathBuf {
        self.base_dir.join("supervisor.pid")
    }

    /// Foreground status indicator published while the daemon is promoted.
    pub fn status_file(&self) -> PathBuf {
        self.base_dir.join("status.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// JSONL log file for a named process.
    pub fn log_file(&self, service_name: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.jsonl", service_name))
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
