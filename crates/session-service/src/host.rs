//! OS-facing effects of the service lifecycle.

use crate::{StatusIndicator, StatusRecord};
use anyhow::{bail, Context};
use async_trait::async_trait;
use service_lifecycle::{is_socket_live, Backoff, ServiceLauncher};
use session_config_and_utils::Paths;
use session_ipc::{IpcClient, Method, Response};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Host adapter for lifecycle effects.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Publish the status indicator. Called again on re-promotion; must be idempotent.
    async fn promote_foreground(&self, indicator: &StatusIndicator) -> anyhow::Result<()>;

    async fn release_foreground(&self) -> anyhow::Result<()>;

    /// Ask for a single deferred start of the service after `delay`.
    async fn schedule_relaunch(&self, delay: Duration) -> anyhow::Result<()>;

    /// Tell the restart supervisor the service is going away.
    async fn broadcast_restart(&self) -> anyhow::Result<()>;
}

/// Production host: status file plus the supervisor socket.
pub struct DaemonHost {
    status_path: PathBuf,
    supervisor_socket: PathBuf,
    launcher: Option<ServiceLauncher>,
}

const SUPERVISOR_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

impl DaemonHost {
    pub fn new(paths: &Paths) -> Self {
        Self {
            status_path: paths.status_file(),
            supervisor_socket: paths.supervisor_socket_file(),
            launcher: None,
        }
    }

    /// Start the supervisor through `launcher` when it is not resident.
    pub fn with_launcher(mut self, launcher: ServiceLauncher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Make sure the supervisor answers on its socket.
    pub async fn ensure_supervisor(&self) -> anyhow::Result<()> {
        if is_socket_live(&self.supervisor_socket) {
            return Ok(());
        }
        let Some(launcher) = &self.launcher else {
            bail!("restart supervisor is not running");
        };

        launcher
            .start_supervisor()
            .context("failed to launch restart supervisor")?;

        let deadline = tokio::time::Instant::now() + SUPERVISOR_STARTUP_TIMEOUT;
        let mut backoff = Backoff::default();
        while tokio::time::Instant::now() < deadline {
            if is_socket_live(&self.supervisor_socket) {
                info!("Restart supervisor is up");
                return Ok(());
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
        bail!("restart supervisor did not come up in time")
    }

    async fn call_supervisor(&self, method: Method, params: serde_json::Value) -> anyhow::Result<Response> {
        self.ensure_supervisor().await?;
        let response = IpcClient::new(&self.supervisor_socket)
            .call_method_with_params(method, params)
            .await
            .with_context(|| format!("supervisor call {} failed", method))?;

        if let Some(error) = &response.error {
            bail!("supervisor rejected {}: {}", method, error.message);
        }
        Ok(response)
    }
}

#[async_trait]
impl HostPlatform for DaemonHost {
    async fn promote_foreground(&self, indicator: &StatusIndicator) -> anyhow::Result<()> {
        StatusRecord::new(indicator)
            .write_to(&self.status_path)
            .with_context(|| format!("failed to write {}", self.status_path.display()))?;
        debug!(path = %self.status_path.display(), "Published status indicator");
        Ok(())
    }

    /// Removes the indicator only while it is still ours; a successor may
    /// already have published its own.
    async fn release_foreground(&self) -> anyhow::Result<()> {
        match StatusRecord::read_from(&self.status_path) {
            Ok(Some(record)) if record.pid != std::process::id() => {
                debug!(pid = record.pid, "Status indicator belongs to a successor");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Unreadable status indicator; removing it"),
        }
        match std::fs::remove_file(&self.status_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("failed to remove status indicator"),
        }
    }

    async fn schedule_relaunch(&self, delay: Duration) -> anyhow::Result<()> {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let response = self
            .call_supervisor(
                Method::SupervisorScheduleRelaunch,
                serde_json::json!({ "delay_ms": delay_ms }),
            )
            .await?;
        let scheduled = response
            .result_field("scheduled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !scheduled {
            warn!("Supervisor already has a relaunch pending");
        }
        Ok(())
    }

    async fn broadcast_restart(&self) -> anyhow::Result<()> {
        self.call_supervisor(Method::SupervisorRestart, serde_json::json!({}))
            .await?;
        Ok(())
    }
}
