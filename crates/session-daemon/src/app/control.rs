//! Stop and status commands.

use service_lifecycle::{cleanup_pid_file, cleanup_socket_file, read_pid_file};
use session_config_and_utils::Paths;
use session_ipc::{IpcClient, Method};
use session_service::StatusRecord;
use std::path::Path;

/// Stop the session service for good, then its supervisor.
pub async fn stop_all(paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    stop_process(
        "Session daemon",
        &paths.socket_file(),
        &paths.pid_file(),
        serde_json::json!({ "restart": false }),
    )
    .await?;
    stop_process(
        "Restart supervisor",
        &paths.supervisor_socket_file(),
        &paths.supervisor_pid_file(),
        serde_json::json!({}),
    )
    .await
}

async fn stop_process(
    label: &str,
    socket_path: &Path,
    pid_path: &Path,
    params: serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    if !socket_path.exists() {
        println!("{} is not running (socket not found)", label);
        cleanup_pid_file(pid_path)?;
        return Ok(());
    }

    // Try graceful shutdown first
    let client = IpcClient::new(socket_path);
    match client.call_method_with_params(Method::Shutdown, params).await {
        Ok(response) if response.is_success() => println!("{} shutdown initiated", label),
        Ok(response) => println!("{} shutdown failed: {:?}", label, response.error),
        Err(e) => println!("Failed to connect to {}: {}", label, e),
    }

    for _ in 0..30 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if !socket_path.exists() {
            println!("{} stopped", label);
            return Ok(());
        }
    }

    if let Ok(Some(pid)) = read_pid_file(pid_path) {
        println!(
            "{} did not stop gracefully, sending SIGKILL to PID {}",
            label, pid
        );
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        cleanup_socket_file(socket_path)?;
        cleanup_pid_file(pid_path)?;
        println!("{} killed", label);
        return Ok(());
    }

    // Last resort: clean up socket file
    cleanup_socket_file(socket_path)?;
    println!("Cleaned up stale {} socket", label.to_lowercase());
    Ok(())
}

/// Print daemon and supervisor health.
pub async fn check_status(paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    let socket_path = paths.socket_file();
    if !socket_path.exists() {
        println!("Session daemon is not running (socket not found)");
    } else {
        match IpcClient::new(&socket_path).call_method(Method::Health).await {
            Ok(response) if response.is_success() => {
                let field = |name: &str| {
                    response
                        .result_field(name)
                        .map(|v| v.as_str().map(str::to_owned).unwrap_or_else(|| v.to_string()))
                        .unwrap_or_else(|| "unknown".to_string())
                };
                println!("Session daemon is running");
                println!("  Status:     {}", field("status"));
                println!("  Version:    {}", field("version"));
                println!("  PID:        {}", field("pid"));
                println!("  Phase:      {}", field("phase"));
                println!("  Foreground: {}", field("foreground"));
                println!("  Socket:     {}", socket_path.display());
            }
            Ok(response) => println!("Session daemon returned error: {:?}", response.error),
            Err(e) => {
                println!("Failed to connect to session daemon: {}", e);
                println!("Daemon may not be running or socket may be stale");
            }
        }
    }

    if let Some(record) = StatusRecord::read_from(&paths.status_file())? {
        println!(
            "  Indicator:  {} ({}) since {}",
            record.indicator.title, record.indicator.text, record.since
        );
    }

    let supervisor_socket = paths.supervisor_socket_file();
    match IpcClient::new(&supervisor_socket).call_method(Method::Health).await {
        Ok(response) if response.is_success() => {
            let pending = response
                .result_field("relaunch_pending")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            println!("Restart supervisor is running (relaunch pending: {})", pending);
        }
        _ => println!("Restart supervisor is not running"),
    }

    Ok(())
}
