//! Binding over the daemon's Unix socket.

use crate::{BindRejected, BoundService, ConnectionSink, ServiceBinder};
use async_trait::async_trait;
use service_lifecycle::{is_socket_live, Backoff, ServiceLauncher, StartMode};
use session_config_and_utils::{AppIdentity, Paths};
use session_ipc::{IpcConnection, IpcError, IpcResult, Method, Request, Response};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A bound connection to the daemon.
pub struct SocketService {
    connection: Arc<IpcConnection>,
    unbound: AtomicBool,
}

impl SocketService {
    fn new(connection: Arc<IpcConnection>) -> Self {
        Self {
            connection,
            unbound: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BoundService for SocketService {
    async fn call(&self, method: Method) -> IpcResult<Response> {
        self.connection.call_method(method).await
    }

    async fn unbind(&self) {
        if self.unbound.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.connection.call_method(Method::ServiceUnbind).await {
            debug!(error = %e, "Unbind frame not delivered");
        }
        self.connection.close().await;
    }
}

/// Production [`ServiceBinder`]. Binds on a background task of the current
/// tokio runtime.
#[derive(Debug, Clone)]
pub struct SocketBinder {
    socket_path: PathBuf,
    interface: String,
    /// Starts the daemon when its socket is not live.
    launcher: Option<ServiceLauncher>,
    start_mode: StartMode,
    connect_timeout: Duration,
}

impl SocketBinder {
    pub fn new(identity: &AppIdentity, paths: &Paths) -> Self {
        Self {
            socket_path: paths.socket_file(),
            interface: identity.interface_descriptor(),
            launcher: None,
            start_mode: StartMode::Plain,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_auto_create(mut self, launcher: ServiceLauncher, mode: StartMode) -> Self {
        self.launcher = Some(launcher);
        self.start_mode = mode;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn ensure_running(&self) -> IpcResult<()> {
        if is_socket_live(&self.socket_path) {
            return Ok(());
        }
        let Some(launcher) = &self.launcher else {
            return Err(IpcError::Socket("session service is not running".to_string()));
        };

        launcher
            .start_service(self.start_mode)
            .map_err(|e| IpcError::Socket(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        let mut backoff = Backoff::default();
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(backoff.next_delay()).await;
            if is_socket_live(&self.socket_path) {
                info!(attempts = backoff.failures(), "Session service came up");
                return Ok(());
            }
        }
        Err(IpcError::Socket(format!(
            "session service did not come up within {:?}",
            self.connect_timeout
        )))
    }

    async fn establish(&self) -> IpcResult<IpcConnection> {
        self.ensure_running().await?;

        let connection = IpcConnection::connect(&self.socket_path).await?;
        let response = connection
            .call(Request::with_params(
                Method::ServiceBind,
                serde_json::json!({ "interface": self.interface }),
            ))
            .await?;
        if let Some(error) = &response.error {
            return Err(IpcError::Protocol(format!(
                "bind refused ({}): {}",
                error.code, error.message
            )));
        }
        Ok(connection)
    }
}

impl ServiceBinder for SocketBinder {
    fn bind(&self, interface: &str, sink: ConnectionSink) -> Result<(), BindRejected> {
        if interface != self.interface {
            return Err(BindRejected::UnknownInterface(interface.to_string()));
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| BindRejected::NoRuntime)?;
        if self.launcher.is_none() && !is_socket_live(&self.socket_path) {
            return Err(BindRejected::ServiceUnavailable);
        }

        let binder = self.clone();
        runtime.spawn(async move {
            match binder.establish().await {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    sink.connected(Arc::new(SocketService::new(connection.clone())))
                        .await;
                    connection.closed().await;
                    sink.disconnected();
                }
                Err(e) => {
                    warn!(error = %e, "Bind to session service failed");
                    sink.disconnected();
                }
            }
        });
        Ok(())
    }
}
