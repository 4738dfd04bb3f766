//! IPC handlers for the session service.

use crate::SessionService;
use session_ipc::{error_codes, IpcServer, Method, Response};
use std::sync::Arc;
use tracing::{info, warn};

/// Register lifecycle, session and health handlers.
pub async fn register_handlers(server: &IpcServer, service: Arc<SessionService>) {
    register_lifecycle(server, service.clone()).await;
    register_session(server, service.clone()).await;
    register_health(server, service).await;
    info!("Registered session service handlers");
}

async fn register_lifecycle(server: &IpcServer, service: Arc<SessionService>) {
    let svc = service.clone();
    server
        .register_handler(Method::ServiceBind, move |req| {
            let svc = svc.clone();
            async move {
                match svc.on_bind().await {
                    Ok(()) => Response::success(&req.id, serde_json::json!({ "bound": true })),
                    Err(e) => Response::error(&req.id, error_codes::INTERNAL_ERROR, &e.to_string()),
                }
            }
        })
        .await;

    let svc = service.clone();
    server
        .register_handler(Method::ServiceStart, move |req| {
            let svc = svc.clone();
            async move {
                match svc.on_start_command().await {
                    Ok(()) => Response::success(&req.id, serde_json::json!({ "started": true })),
                    Err(e) => Response::error(&req.id, error_codes::INTERNAL_ERROR, &e.to_string()),
                }
            }
        })
        .await;

    let svc = service.clone();
    server
        .register_handler(Method::ServiceUnbind, move |req| {
            let svc = svc.clone();
            async move {
                svc.on_unbind().await;
                Response::success(&req.id, serde_json::json!({ "unbound": true }))
            }
        })
        .await;

    server
        .register_handler(Method::ServiceTaskRemoved, move |req| {
            let svc = service.clone();
            async move {
                svc.on_task_removed().await;
                Response::success(&req.id, serde_json::json!({ "acknowledged": true }))
            }
        })
        .await;
}

/// Run a store-backed operation on the blocking pool; vault reads wait on a
/// file lock the other process may hold.
async fn off_runtime<T, F>(service: &Arc<SessionService>, op: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&SessionService) -> T + Send + 'static,
{
    let service = service.clone();
    tokio::task::spawn_blocking(move || op(&service))
        .await
        .map_err(|e| e.to_string())
}

fn session_reply(id: &str, field: &str, value: Result<serde_json::Value, String>) -> Response {
    match value {
        Ok(value) => Response::success(id, serde_json::json!({ field: value })),
        Err(e) => {
            warn!(error = %e, field, "Session operation aborted");
            Response::error(id, error_codes::INTERNAL_ERROR, &e)
        }
    }
}

async fn register_session(server: &IpcServer, service: Arc<SessionService>) {
    let svc = service.clone();
    server
        .register_handler(Method::SessionGetAccessToken, move |req| {
            let svc = svc.clone();
            async move {
                let token = off_runtime(&svc, |s| s.get_access_token()).await;
                session_reply(&req.id, "access_token", token.map(Into::into))
            }
        })
        .await;

    let svc = service.clone();
    server
        .register_handler(Method::SessionGetRefreshToken, move |req| {
            let svc = svc.clone();
            async move {
                let token = off_runtime(&svc, |s| s.get_refresh_token()).await;
                session_reply(&req.id, "refresh_token", token.map(Into::into))
            }
        })
        .await;

    let svc = service.clone();
    server
        .register_handler(Method::SessionGetIdToken, move |req| {
            let svc = svc.clone();
            async move {
                let token = off_runtime(&svc, |s| s.get_id_token()).await;
                session_reply(&req.id, "id_token", token.map(Into::into))
            }
        })
        .await;

    let svc = service.clone();
    server
        .register_handler(Method::SessionIsAuthenticated, move |req| {
            let svc = svc.clone();
            async move {
                let authenticated = off_runtime(&svc, |s| s.is_authenticated()).await;
                session_reply(&req.id, "authenticated", authenticated.map(Into::into))
            }
        })
        .await;

    server
        .register_handler(Method::SessionLogout, move |req| {
            let svc = service.clone();
            async move {
                let logged_out = off_runtime(&svc, |s| s.logout()).await;
                session_reply(&req.id, "logged_out", logged_out.map(Into::into))
            }
        })
        .await;
}

async fn register_health(server: &IpcServer, service: Arc<SessionService>) {
    let svc = service.clone();
    server
        .register_handler(Method::Health, move |req| {
            let svc = svc.clone();
            async move {
                let state = svc.lifecycle_state().await;
                Response::success(
                    &req.id,
                    serde_json::json!({
                        "status": "ok",
                        "version": env!("CARGO_PKG_VERSION"),
                        "pid": std::process::id(),
                        "phase": svc.phase().await,
                        "running": state.running,
                        "foreground": state.foreground,
                    }),
                )
            }
        })
        .await;

    // `{"restart": false}` marks an intentional stop.
    let shutdown_tx = server.shutdown_sender();
    server
        .register_handler(Method::Shutdown, move |req| {
            let tx = shutdown_tx.clone();
            let svc = service.clone();
            async move {
                if req.param_bool("restart") == Some(false) {
                    svc.suppress_restart();
                }
                let _ = tx.send(());
                Response::success(&req.id, serde_json::json!({ "status": "shutting_down" }))
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{memory_service, HostCall, RecordingHost};
    use session_ipc::{IpcClient, IpcConnection, Request};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    const INTERFACE: &str = "com.example.app.ISessionService";

    async fn serve(path: &Path, service: Arc<SessionService>) -> Arc<IpcServer> {
        let server = Arc::new(IpcServer::with_interface(path, INTERFACE));
        register_handlers(&server, service).await;
        let runner = server.clone();
        tokio::spawn(async move { runner.run().await });
        for _ in 0..100 {
            if IpcClient::new(path).is_running().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        server
    }

    #[tokio::test]
    async fn test_bind_then_session_operations_over_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let host = Arc::new(RecordingHost::default());
        let service = Arc::new(memory_service(host.clone()));
        let server = serve(&path, service.clone()).await;

        let connection = IpcConnection::connect(&path).await.unwrap();
        let bind = connection
            .call(Request::with_params(
                Method::ServiceBind,
                serde_json::json!({ "interface": INTERFACE }),
            ))
            .await
            .unwrap();
        assert!(bind.is_success());
        assert_eq!(host.calls(), vec![HostCall::Promote]);

        let authenticated = connection
            .call_method(Method::SessionIsAuthenticated)
            .await
            .unwrap();
        assert_eq!(
            authenticated.result_field("authenticated"),
            Some(&serde_json::json!(false))
        );

        let token = connection
            .call_method(Method::SessionGetAccessToken)
            .await
            .unwrap();
        assert_eq!(token.result_field("access_token"), Some(&serde_json::Value::Null));

        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_operations_read_shared_vault() {
        use session_config_and_utils::{AppIdentity, Paths};
        use session_storage::{TokenSet, TokenStore};

        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let identity = AppIdentity::new("com.example.app").unwrap();
        let factory_paths = paths.clone();
        let factory_identity = identity.clone();
        let service = Arc::new(SessionService::new(
            Box::new(move || TokenStore::open(&factory_paths, &factory_identity, true)),
            Arc::new(RecordingHost::default()),
            Duration::from_millis(1000),
        ));
        let path = dir.path().join("daemon.sock");
        let server = serve(&path, service).await;

        TokenStore::open(&paths, &identity, true)
            .unwrap()
            .save_tokens(&TokenSet::new("A1").with_id_token("I1").expiring_in(3600))
            .unwrap();

        let connection = IpcConnection::connect(&path).await.unwrap();
        connection
            .call(Request::with_params(
                Method::ServiceBind,
                serde_json::json!({ "interface": INTERFACE }),
            ))
            .await
            .unwrap();

        let token = connection
            .call_method(Method::SessionGetAccessToken)
            .await
            .unwrap();
        assert_eq!(token.result_field("access_token"), Some(&serde_json::json!("A1")));
        let id = connection.call_method(Method::SessionGetIdToken).await.unwrap();
        assert_eq!(id.result_field("id_token"), Some(&serde_json::json!("I1")));

        let logout = connection.call_method(Method::SessionLogout).await.unwrap();
        assert_eq!(logout.result_field("logged_out"), Some(&serde_json::json!(true)));
        let authenticated = connection
            .call_method(Method::SessionIsAuthenticated)
            .await
            .unwrap();
        assert_eq!(
            authenticated.result_field("authenticated"),
            Some(&serde_json::json!(false))
        );

        server.shutdown();
    }

    #[tokio::test]
    async fn test_health_reports_phase() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let service = Arc::new(memory_service(Arc::new(RecordingHost::default())));
        let server = serve(&path, service).await;

        let health = IpcClient::new(&path).call_method(Method::Health).await.unwrap();
        assert_eq!(health.result_field("phase"), Some(&serde_json::json!("created")));
        assert_eq!(health.result_field("foreground"), Some(&serde_json::json!(false)));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_method_signals_server() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let service = Arc::new(memory_service(Arc::new(RecordingHost::default())));
        let server = serve(&path, service).await;
        let mut shutdown_rx = server.shutdown_receiver();

        IpcClient::new(&path).call_method(Method::Shutdown).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), shutdown_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_final_shutdown_skips_restart_broadcast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let host = Arc::new(RecordingHost::default());
        let service = Arc::new(memory_service(host.clone()));
        service.on_start_command().await.unwrap();
        let server = serve(&path, service.clone()).await;

        IpcClient::new(&path)
            .call_method_with_params(Method::Shutdown, serde_json::json!({ "restart": false }))
            .await
            .unwrap();
        service.on_destroy().await;

        assert!(!host.calls().contains(&HostCall::BroadcastRestart));
        server.shutdown();
    }
}
