//! Client against a real session service over its Unix socket, with the
//! application's vault shared between the "foreground" writer and the daemon.

use async_trait::async_trait;
use service_lifecycle::is_socket_live;
use session_config_and_utils::{AppIdentity, Config, Paths};
use session_ipc::IpcServer;
use session_service::{HostPlatform, SessionService, StatusIndicator};
use session_service_client::{ConnectionState, SessionServiceClient, SocketBinder};
use session_storage::{TokenSet, TokenStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

struct QuietHost;

#[async_trait]
impl HostPlatform for QuietHost {
    async fn promote_foreground(&self, _indicator: &StatusIndicator) -> anyhow::Result<()> {
        Ok(())
    }

    async fn release_foreground(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn schedule_relaunch(&self, _delay: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    async fn broadcast_restart(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    paths: Paths,
    identity: AppIdentity,
    server: Arc<IpcServer>,
}

async fn start_daemon() -> Fixture {
    let dir = tempdir().unwrap();
    let paths = Paths::with_base_dir(dir.path().to_path_buf());
    paths.ensure_dirs().unwrap();
    let identity = AppIdentity::new("com.example.notes").unwrap();

    let service = Arc::new(SessionService::for_app(
        &paths,
        &identity,
        &Config::default(),
        Arc::new(QuietHost),
    ));
    let server = Arc::new(IpcServer::with_interface(
        paths.socket_file(),
        identity.interface_descriptor(),
    ));
    session_service::ipc::register_handlers(&server, service).await;
    let runner = server.clone();
    tokio::spawn(async move { runner.run().await });

    for _ in 0..200 {
        if is_socket_live(&paths.socket_file()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Fixture {
        _dir: dir,
        paths,
        identity,
        server,
    }
}

async fn wait_for_state(client: &SessionServiceClient, state: ConnectionState) -> bool {
    let mut rx = client.subscribe();
    let reached = matches!(
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state)).await,
        Ok(Ok(_))
    );
    reached
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokens_written_by_app_are_served_by_daemon() {
    let fx = start_daemon().await;
    let client = SessionServiceClient::new(
        &fx.identity,
        Arc::new(SocketBinder::new(&fx.identity, &fx.paths)),
    );

    assert!(client.connect());
    assert!(client.wait_connected(Duration::from_secs(5)).await);
    assert!(!client.is_authenticated().await);

    let app_store = TokenStore::open(&fx.paths, &fx.identity, true).unwrap();
    app_store
        .save_tokens(
            &TokenSet::new("A1")
                .with_refresh_token("R1")
                .with_id_token("I1")
                .expiring_in(3600),
        )
        .unwrap();

    assert!(client.is_authenticated().await);
    assert_eq!(client.get_access_token().await.as_deref(), Some("A1"));
    assert_eq!(client.get_refresh_token().await.as_deref(), Some("R1"));
    assert_eq!(client.get_id_token().await.as_deref(), Some("I1"));

    assert!(client.logout().await);
    assert!(!client.is_authenticated().await);
    assert_eq!(client.get_access_token().await, None);
    assert!(!app_store.is_authenticated());

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    fx.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_interface_never_connects() {
    let fx = start_daemon().await;
    let stranger = AppIdentity::new("com.example.other").unwrap();
    let client = SessionServiceClient::new(
        &stranger,
        Arc::new(SocketBinder::new(&stranger, &fx.paths)),
    );

    assert!(client.connect());
    assert!(wait_for_state(&client, ConnectionState::Disconnected).await);
    assert_eq!(client.get_access_token().await, None);
    fx.server.shutdown();
}

#[tokio::test]
async fn test_connect_without_daemon_is_rejected() {
    let dir = tempdir().unwrap();
    let paths = Paths::with_base_dir(dir.path().to_path_buf());
    let identity = AppIdentity::new("com.example.notes").unwrap();
    let client = SessionServiceClient::new(&identity, Arc::new(SocketBinder::new(&identity, &paths)));

    assert!(!client.connect());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_daemon_shutdown_is_reported_as_disconnect() {
    let fx = start_daemon().await;
    let client = SessionServiceClient::new(
        &fx.identity,
        Arc::new(SocketBinder::new(&fx.identity, &fx.paths)),
    );
    assert!(client.connect());
    assert!(client.wait_connected(Duration::from_secs(5)).await);

    fx.server.shutdown();

    assert!(wait_for_state(&client, ConnectionState::Disconnected).await);
    assert!(!client.is_authenticated().await);
}
