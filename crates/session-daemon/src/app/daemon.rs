//! The session service process.

use service_lifecycle::{LifecycleError, ProcessInfo, ServiceLauncher};
use session_config_and_utils::{AppIdentity, Config, Paths};
use session_ipc::IpcServer;
use session_service::ipc::register_handlers;
use session_service::{DaemonHost, SessionService};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Run the session service until it is stopped or destroyed.
pub async fn run_daemon(
    identity: AppIdentity,
    paths: Paths,
    config: Config,
    log_level: String,
    foreground: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let process = ProcessInfo::new(paths.socket_file(), paths.pid_file());
    let pid = match process.claim() {
        Ok(pid) => pid,
        Err(LifecycleError::AlreadyRunning) => {
            eprintln!(
                "Error: session daemon for {} is already running. Use 'session-daemon stop' to stop it first.",
                identity
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    info!(pid, app_id = %identity, "Starting session daemon");
    info!(
        relaunch_delay_ms = config.relaunch_delay_ms,
        start_mode = ?config.start_mode,
        vault_encryption = config.vault_encryption,
        "Configuration loaded"
    );

    let launcher = ServiceLauncher::new(&identity, &paths).with_log_level(log_level);
    let host = DaemonHost::new(&paths).with_launcher(launcher);
    if let Err(e) = host.ensure_supervisor().await {
        warn!(error = %e, "Restart supervisor unavailable; no relaunch after teardown");
    }

    let service = Arc::new(SessionService::for_app(
        &paths,
        &identity,
        &config,
        Arc::new(host),
    ));
    let server = Arc::new(IpcServer::with_interface(
        paths.socket_file(),
        identity.interface_descriptor(),
    ));
    register_handlers(&server, service.clone()).await;

    let mut shutdown_rx = server.shutdown_receiver();
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    info!(socket = %paths.socket_file().display(), "IPC server starting");
    let runner = server.clone();
    let mut server_task = tokio::spawn(async move { runner.run().await });

    if foreground {
        if let Err(e) = service.on_start_command().await {
            error!(error = %e, "Start command failed");
        }
    }

    let finished = loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP: launching task removed");
                service.on_task_removed().await;
            }
            _ = terminate.recv() => {
                info!("SIGTERM received");
                break None;
            }
            _ = interrupt.recv() => {
                info!("SIGINT received");
                break None;
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested");
                break None;
            }
            joined = &mut server_task => break Some(joined),
        }
    };

    // The socket must be gone before the supervisor is asked to restart us.
    let joined = match finished {
        Some(joined) => joined,
        None => {
            server.shutdown();
            server_task.await
        }
    };

    // Release our files before the supervisor can start a successor.
    match process.cleanup() {
        Ok(true) => {}
        Ok(false) => warn!("A successor already owns the socket; left its files in place"),
        Err(e) => warn!(error = %e, "Failed to clean up socket or PID file"),
    }

    service.on_destroy().await;
    info!("Session daemon stopped");

    joined?.map_err(|e| e.into())
}
