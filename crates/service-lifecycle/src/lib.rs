//! Lifecycle management for the session service.
//!
//! - [`machine`]: the pure service state machine and [`LifecycleTracker`]
//! - [`launcher`]: starting the daemon and supervisor as detached processes
//! - singleton enforcement and PID files (this module)

pub mod launcher;
pub mod machine;

pub use launcher::{daemon_binary_candidates, Backoff, ServiceLauncher, StartMode, DAEMON_BINARY_ENV};
pub use machine::{
    LifecycleTracker, ServiceInput, ServiceLifecycleState, ServiceOutput, ServicePhase,
};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors from lifecycle management.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Service is already running")]
    AlreadyRunning,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PID file error: {0}")]
    PidFile(String),
    #[error("Failed to launch {what}: {reason}")]
    Spawn { what: String, reason: String },
}

/// Result of checking whether a service already owns a socket.
#[derive(Debug, PartialEq, Eq)]
pub enum SingletonCheck {
    /// Nothing running, safe to start.
    Available,
    /// A stale socket was found and cleaned up.
    StaleSocketCleaned,
    /// Another instance answered on the socket.
    AlreadyRunning,
}

/// Check if a service is already running by connecting to its socket.
pub fn check_singleton(socket_path: &Path) -> SingletonCheck {
    if !socket_path.exists() {
        return SingletonCheck::Available;
    }

    // Sync connect so callers need no runtime.
    match std::os::unix::net::UnixStream::connect(socket_path) {
        Ok(_stream) => SingletonCheck::AlreadyRunning,
        Err(_) => {
            let _ = std::fs::remove_file(socket_path);
            SingletonCheck::StaleSocketCleaned
        }
    }
}

/// Whether something accepts connections on the socket. Never cleans up.
pub fn is_socket_live(socket_path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

/// Write the current process PID to the given path.
pub fn write_pid_file(pid_path: &Path) -> Result<u32, LifecycleError> {
    let pid = std::process::id();
    std::fs::write(pid_path, pid.to_string())?;
    Ok(pid)
}

/// Read a PID from the given file.
pub fn read_pid_file(pid_path: &Path) -> Result<Option<u32>, LifecycleError> {
    if !pid_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(pid_path)?;
    let pid = content
        .trim()
        .parse::<u32>()
        .map_err(|e| LifecycleError::PidFile(format!("Invalid PID: {}", e)))?;
    Ok(Some(pid))
}

pub fn cleanup_pid_file(pid_path: &Path) -> Result<(), LifecycleError> {
    if pid_path.exists() {
        std::fs::remove_file(pid_path)?;
    }
    Ok(())
}

pub fn cleanup_socket_file(socket_path: &Path) -> Result<(), LifecycleError> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    Ok(())
}

/// Socket and PID file of one resident process (daemon or supervisor).
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: Option<u32>,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
}

impl ProcessInfo {
    pub fn new(socket_path: PathBuf, pid_path: PathBuf) -> Self {
        Self {
            pid: None,
            socket_path,
            pid_path,
        }
    }

    pub fn load_pid(&mut self) -> Result<(), LifecycleError> {
        self.pid = read_pid_file(&self.pid_path)?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        is_socket_live(&self.socket_path)
    }

    /// Claim the socket for this process: fails if another instance answers,
    /// otherwise clears stale files and writes our PID.
    pub fn claim(&self) -> Result<u32, LifecycleError> {
        if check_singleton(&self.socket_path) == SingletonCheck::AlreadyRunning {
            return Err(LifecycleError::AlreadyRunning);
        }
        if let Some(parent) = self.pid_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_pid_file(&self.pid_path)
    }

    /// Remove socket and PID file if the PID file still names this process.
    ///
    /// Returns `false` and leaves both files alone once a successor has
    /// claimed them.
    pub fn cleanup(&self) -> Result<bool, LifecycleError> {
        let ours = std::process::id();
        match read_pid_file(&self.pid_path) {
            Ok(Some(pid)) if pid != ours => {
                debug!(pid, ours, "PID file belongs to a successor; leaving it");
                return Ok(false);
            }
            Ok(_) => {}
            Err(LifecycleError::PidFile(reason)) => {
                debug!(reason = %reason, "Unreadable PID file; leaving it");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        cleanup_socket_file(&self.socket_path)?;
        cleanup_pid_file(&self.pid_path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    fn tmp() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn bind_listener_or_skip(socket_path: &Path) -> Option<UnixListener> {
        match UnixListener::bind(socket_path) {
            Ok(listener) => Some(listener),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => None,
            Err(err) => panic!("failed to bind unix listener at {:?}: {}", socket_path, err),
        }
    }

    #[test]
    fn singleton_available_when_no_socket() {
        let dir = tmp();
        assert_eq!(
            check_singleton(&dir.path().join("daemon.sock")),
            SingletonCheck::Available
        );
    }

    #[test]
    fn singleton_cleans_stale_socket() {
        let dir = tmp();
        let socket = dir.path().join("daemon.sock");
        {
            let Some(_listener) = bind_listener_or_skip(&socket) else {
                return;
            };
            assert_eq!(check_singleton(&socket), SingletonCheck::AlreadyRunning);
            assert!(is_socket_live(&socket));
        }
        assert!(!is_socket_live(&socket));
        assert!(socket.exists());
        assert_eq!(check_singleton(&socket), SingletonCheck::StaleSocketCleaned);
        assert!(!socket.exists());
    }

    #[test]
    fn pid_file_write_read_and_cleanup() {
        let dir = tmp();
        let pid_path = dir.path().join("daemon.pid");

        assert_eq!(read_pid_file(&pid_path).unwrap(), None);
        let written = write_pid_file(&pid_path).unwrap();
        assert_eq!(read_pid_file(&pid_path).unwrap(), Some(written));

        cleanup_pid_file(&pid_path).unwrap();
        cleanup_pid_file(&pid_path).unwrap();
        assert!(!pid_path.exists());
    }

    #[test]
    fn pid_file_with_garbage_is_an_error() {
        let dir = tmp();
        let pid_path = dir.path().join("daemon.pid");
        std::fs::write(&pid_path, "not-a-number").unwrap();
        assert!(matches!(read_pid_file(&pid_path), Err(LifecycleError::PidFile(_))));
    }

    #[test]
    fn claim_refuses_when_another_instance_answers() {
        let dir = tmp();
        let socket = dir.path().join("daemon.sock");
        let info = ProcessInfo::new(socket.clone(), dir.path().join("daemon.pid"));
        let Some(_listener) = bind_listener_or_skip(&socket) else {
            return;
        };

        assert!(info.is_running());
        assert!(matches!(info.claim(), Err(LifecycleError::AlreadyRunning)));
        assert!(!info.pid_path.exists());
    }

    #[test]
    fn claim_writes_pid_and_cleanup_removes_files() {
        let dir = tmp();
        let socket = dir.path().join("daemon.sock");
        std::fs::write(&socket, "stale").unwrap();
        let mut info = ProcessInfo::new(socket.clone(), dir.path().join("run/daemon.pid"));

        let pid = info.claim().unwrap();
        info.load_pid().unwrap();
        assert_eq!(info.pid, Some(pid));
        assert!(!socket.exists());

        assert!(info.cleanup().unwrap());
        assert!(!info.pid_path.exists());
    }

    #[test]
    fn cleanup_leaves_a_successors_files() {
        let dir = tmp();
        let socket = dir.path().join("daemon.sock");
        let pid_path = dir.path().join("daemon.pid");
        let old = ProcessInfo::new(socket.clone(), pid_path.clone());
        old.claim().unwrap();

        // The replacement claims and listens before the old process exits.
        std::fs::write(&pid_path, "999999").unwrap();
        let Some(_listener) = bind_listener_or_skip(&socket) else {
            return;
        };

        assert!(!old.cleanup().unwrap());
        assert!(socket.exists());
        assert_eq!(read_pid_file(&pid_path).unwrap(), Some(999999));
        assert_eq!(check_singleton(&socket), SingletonCheck::AlreadyRunning);
    }
}
