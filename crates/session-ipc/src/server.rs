//! IPC server implementation.
//!
//! ## Binding
//!
//! A server created with [`IpcServer::with_interface`] serves one interface
//! id. Each connection starts unbound:
//!
//! 1. Client sends `service.bind` with `{"interface": "<id>"}`
//! 2. Server checks the id, marks the connection bound, runs the bind handler
//! 3. Session operations are accepted on that connection until `service.unbind`
//!
//! A connection that closes while bound is reported to the `service.unbind`
//! handler as if the client had unbound.

use crate::{error_codes, IpcError, IpcResult, Method, Request, Response};
use std::collections::HashMap;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Largest request line a connection may send, newline included.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Handler function type for IPC methods.
pub type HandlerFn =
    Box<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<Method, HandlerFn>>>;

/// IPC server that listens on a Unix domain socket.
pub struct IpcServer {
    socket_path: PathBuf,
    /// Interface id a bind must name. `None` disables bind tracking.
    interface: Option<String>,
    handlers: HandlerMap,
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    /// Server without bind tracking (e.g. the supervisor).
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            socket_path: socket_path.into(),
            interface: None,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// Server that requires a bind to `interface` before session operations.
    pub fn with_interface(socket_path: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        let mut server = Self::new(socket_path);
        server.interface = Some(interface.into());
        server
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Register a handler for a method.
    pub async fn register_handler<F, Fut>(&self, method: Method, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let boxed_handler: HandlerFn = Box::new(move |req| Box::pin(handler(req)));
        self.handlers.write().await.insert(method, boxed_handler);
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a shutdown sender (for handlers that need to trigger shutdown).
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the socket and serve until shutdown.
    pub async fn run(&self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        info!(path = %self.socket_path.display(), "IPC server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let handlers = self.handlers.clone();
                            let interface = self.interface.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handlers, interface, shutdown_rx).await {
                                    debug!(error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> IpcResult<()> {
    let response_json = response.to_json()?;
    writer.write_all(response_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn dispatch(handlers: &HandlerMap, request: Request) -> Response {
    let handlers = handlers.read().await;
    match handlers.get(&request.method) {
        Some(handler) => handler(request).await,
        None => Response::error(
            &request.id,
            error_codes::METHOD_NOT_FOUND,
            &format!("Method not found: {}", request.method),
        ),
    }
}

/// Handle a single client connection.
async fn handle_connection(
    stream: UnixStream,
    handlers: HandlerMap,
    interface: Option<String>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> IpcResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut bound = false;

    debug!("Client connected");

    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_FRAME_BYTES as u64);
        let bytes_read = tokio::select! {
            read = limited.read_line(&mut line) => read?,
            _ = shutdown_rx.recv() => {
                debug!("Closing connection for shutdown");
                return Ok(());
            }
        };

        if bytes_read == 0 {
            debug!(bound, "Client disconnected");
            break;
        }

        if !line.ends_with('\n') && bytes_read == MAX_FRAME_BYTES {
            warn!(limit = MAX_FRAME_BYTES, "Request frame too large; closing connection");
            let response = Response::error(
                "",
                error_codes::INVALID_REQUEST,
                &format!("Request exceeds {} bytes", MAX_FRAME_BYTES),
            );
            write_response(&mut writer, &response).await?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request = match Request::from_json(trimmed) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "Failed to parse request");
                let response =
                    Response::error("", error_codes::PARSE_ERROR, &format!("Parse error: {}", e));
                write_response(&mut writer, &response).await?;
                continue;
            }
        };

        debug!(id = %request.id, method = %request.method, "Received request");

        let response = match (&interface, request.method) {
            (Some(expected), Method::ServiceBind) => {
                let requested = request.param_str("interface").map(str::to_owned);
                if requested.as_deref() == Some(expected.as_str()) {
                    let response = dispatch(&handlers, request).await;
                    bound = response.is_success();
                    response
                } else {
                    warn!(requested = ?requested, expected = %expected, "Bind rejected");
                    Response::error(
                        &request.id,
                        error_codes::BIND_REJECTED,
                        &format!(
                            "Unknown interface: {}",
                            requested.as_deref().unwrap_or("<none>")
                        ),
                    )
                }
            }
            (Some(_), Method::ServiceUnbind) => {
                bound = false;
                dispatch(&handlers, request).await
            }
            (Some(_), method) if method.is_session_operation() && !bound => Response::error(
                &request.id,
                error_codes::NOT_BOUND,
                "Connection is not bound to the service",
            ),
            _ => dispatch(&handlers, request).await,
        };

        write_response(&mut writer, &response).await?;
    }

    if bound {
        dispatch(&handlers, Request::new(Method::ServiceUnbind)).await;
    }

    Ok(())
}

/// One-shot IPC client: one connection per request.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Send a request and wait for response.
    pub async fn call(&self, request: Request) -> IpcResult<Response> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| IpcError::Socket(format!("Failed to connect: {}", e)))?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request_json = request.to_json()?;
        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut line = String::new();
        reader.read_line(&mut line).await?;

        if line.is_empty() {
            return Err(IpcError::ConnectionClosed);
        }

        Ok(Response::from_json(line.trim())?)
    }

    /// Send a method call with no parameters.
    pub async fn call_method(&self, method: Method) -> IpcResult<Response> {
        self.call(Request::new(method)).await
    }

    /// Send a method call with parameters.
    pub async fn call_method_with_params(
        &self,
        method: Method,
        params: serde_json::Value,
    ) -> IpcResult<Response> {
        self.call(Request::with_params(method, params)).await
    }

    /// Whether something answers `health` on the socket.
    pub async fn is_running(&self) -> bool {
        self.call_method(Method::Health).await.is_ok()
    }
}
