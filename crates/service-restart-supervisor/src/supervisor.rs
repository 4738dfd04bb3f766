//! The restart supervisor.

use crate::{DelayedTaskScheduler, SupervisorResult};
use service_lifecycle::{is_socket_live, LifecycleError, ServiceLauncher, StartMode};
use session_config_and_utils::{Config, Paths};
use session_ipc::{error_codes, IpcServer, Method, Response};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How long a restart waits for the old service socket to go quiet.
pub const QUIET_TIMEOUT: Duration = Duration::from_secs(3);
const QUIET_POLL: Duration = Duration::from_millis(100);

/// Starts the session service process.
pub trait ServiceStarter: Send + Sync {
    fn start_service(&self, mode: StartMode) -> Result<u32, LifecycleError>;
}

impl ServiceStarter for ServiceLauncher {
    fn start_service(&self, mode: StartMode) -> Result<u32, LifecycleError> {
        ServiceLauncher::start_service(self, mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Launched { pid: u32 },
    /// A service still answers on its socket; nothing was launched.
    AlreadyRunning,
}

pub struct RestartSupervisor {
    service_socket: PathBuf,
    start_mode: StartMode,
    starter: Arc<dyn ServiceStarter>,
    scheduler: Arc<dyn DelayedTaskScheduler>,
    quiet_timeout: Duration,
    /// One restart at a time.
    restarting: Mutex<()>,
}

impl RestartSupervisor {
    pub fn new(
        paths: &Paths,
        config: &Config,
        starter: Arc<dyn ServiceStarter>,
        scheduler: Arc<dyn DelayedTaskScheduler>,
    ) -> Self {
        Self {
            service_socket: paths.socket_file(),
            start_mode: StartMode::for_host(config.start_mode),
            starter,
            scheduler,
            quiet_timeout: QUIET_TIMEOUT,
            restarting: Mutex::new(()),
        }
    }

    pub fn with_quiet_timeout(mut self, timeout: Duration) -> Self {
        self.quiet_timeout = timeout;
        self
    }

    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    /// Start the service unless one is still alive.
    pub async fn restart(&self) -> SupervisorResult<RestartOutcome> {
        let _guard = self.restarting.lock().await;

        let deadline = tokio::time::Instant::now() + self.quiet_timeout;
        while is_socket_live(&self.service_socket) {
            if tokio::time::Instant::now() >= deadline {
                info!("Session service still answers; skipping restart");
                return Ok(RestartOutcome::AlreadyRunning);
            }
            tokio::time::sleep(QUIET_POLL).await;
        }

        let pid = self.starter.start_service(self.start_mode)?;
        info!(pid, mode = ?self.start_mode, "Restarted session service");
        Ok(RestartOutcome::Launched { pid })
    }

    /// Queue one deferred restart. Returns `false` if one is already pending.
    pub fn schedule_relaunch(self: &Arc<Self>, delay: Duration) -> bool {
        let supervisor = self.clone();
        let scheduled = self.scheduler.schedule_once(
            delay,
            Box::pin(async move {
                if let Err(e) = supervisor.restart().await {
                    warn!(error = %e, "Deferred relaunch failed");
                }
            }),
        );
        if scheduled {
            info!(delay_ms = delay.as_millis() as u64, "Relaunch scheduled");
        }
        scheduled
    }

    pub fn relaunch_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Cancel any pending relaunch.
    pub fn stop(&self) {
        self.scheduler.cancel();
    }
}

/// Register supervisor handlers.
pub async fn register_handlers(server: &IpcServer, supervisor: Arc<RestartSupervisor>) {
    let sup = supervisor.clone();
    server
        .register_handler(Method::SupervisorRestart, move |req| {
            let sup = sup.clone();
            async move {
                // Answer right away: the caller is mid-teardown.
                tokio::spawn(async move {
                    if let Err(e) = sup.restart().await {
                        warn!(error = %e, "Restart failed");
                    }
                });
                Response::success(&req.id, serde_json::json!({ "accepted": true }))
            }
        })
        .await;

    let sup = supervisor.clone();
    server
        .register_handler(Method::SupervisorScheduleRelaunch, move |req| {
            let sup = sup.clone();
            async move {
                let Some(delay_ms) = req.param_u64("delay_ms") else {
                    return Response::error(&req.id, error_codes::INVALID_PARAMS, "delay_ms is required");
                };
                let scheduled = sup.schedule_relaunch(Duration::from_millis(delay_ms));
                Response::success(&req.id, serde_json::json!({ "scheduled": scheduled }))
            }
        })
        .await;

    server
        .register_handler(Method::Health, move |req| {
            let sup = supervisor.clone();
            async move {
                Response::success(
                    &req.id,
                    serde_json::json!({
                        "status": "ok",
                        "pid": std::process::id(),
                        "relaunch_pending": sup.relaunch_pending(),
                    }),
                )
            }
        })
        .await;

    let shutdown_tx = server.shutdown_sender();
    server
        .register_handler(Method::Shutdown, move |req| {
            let tx = shutdown_tx.clone();
            async move {
                let _ = tx.send(());
                Response::success(&req.id, serde_json::json!({ "status": "shutting_down" }))
            }
        })
        .await;

    info!("Registered supervisor handlers");
}
