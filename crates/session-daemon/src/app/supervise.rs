//! The restart supervisor process.

use service_lifecycle::{LifecycleError, ProcessInfo, ServiceLauncher};
use service_restart_supervisor::{register_handlers, RestartSupervisor, TokioScheduler};
use session_config_and_utils::{AppIdentity, Config, Paths};
use session_ipc::IpcServer;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

pub async fn run_supervisor(
    identity: AppIdentity,
    paths: Paths,
    config: Config,
    log_level: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let process = ProcessInfo::new(paths.supervisor_socket_file(), paths.supervisor_pid_file());
    let pid = match process.claim() {
        Ok(pid) => pid,
        Err(LifecycleError::AlreadyRunning) => {
            info!("Restart supervisor already running");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    info!(pid, app_id = %identity, "Starting restart supervisor");

    let launcher = ServiceLauncher::new(&identity, &paths).with_log_level(log_level);
    let supervisor = Arc::new(RestartSupervisor::new(
        &paths,
        &config,
        Arc::new(launcher),
        Arc::new(TokioScheduler::new()),
    ));
    info!(start_mode = ?supervisor.start_mode(), "Relaunch mode resolved");

    let server = Arc::new(IpcServer::new(paths.supervisor_socket_file()));
    register_handlers(&server, supervisor.clone()).await;

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    let runner = server.clone();
    let mut server_task = tokio::spawn(async move { runner.run().await });

    let finished = loop {
        tokio::select! {
            _ = hangup.recv() => debug!("Ignoring SIGHUP"),
            _ = terminate.recv() => break None,
            _ = interrupt.recv() => break None,
            joined = &mut server_task => break Some(joined),
        }
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            server.shutdown();
            server_task.await
        }
    };

    supervisor.stop();
    if let Err(e) = process.cleanup() {
        warn!(error = %e, "Failed to clean up supervisor socket or PID file");
    }
    info!("Restart supervisor stopped");

    joined?.map_err(|e| e.into())
}
