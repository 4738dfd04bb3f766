//! Persistent client connection.
//!
//! Unlike [`crate::IpcClient`], the socket stays open so that server-side
//! state tied to the connection (the bind) survives between calls. Calls may
//! be issued concurrently; responses are matched to callers by request id.

use crate::{IpcError, IpcResult, Method, Request, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

pub struct IpcConnection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    closed_rx: watch::Receiver<bool>,
    reader_task: JoinHandle<()>,
}

impl IpcConnection {
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path.as_ref())
            .await
            .map_err(|e| IpcError::Socket(format!("Failed to connect: {}", e)))?;

        let (reader, writer) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (closed_tx, closed_rx) = watch::channel(false);

        let reader_task = tokio::spawn(read_responses(reader, pending.clone(), closed_tx));

        Ok(Self {
            writer: tokio::sync::Mutex::new(writer),
            pending,
            closed_rx,
            reader_task,
        })
    }

    /// Send a request and wait for its response.
    pub async fn call(&self, request: Request) -> IpcResult<Response> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request.id.clone(), tx);

        // The reader marks the connection closed before draining `pending`,
        // so a request registered after the drain is caught here.
        if self.is_closed() {
            self.pending.lock().remove(&request.id);
            return Err(IpcError::ConnectionClosed);
        }

        let request_json = request.to_json()?;
        let write_result = {
            let mut writer = self.writer.lock().await;
            async {
                writer.write_all(request_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await
            }
            .await
        };
        if let Err(e) = write_result {
            self.pending.lock().remove(&request.id);
            return Err(e.into());
        }

        rx.await.map_err(|_| IpcError::ConnectionClosed)
    }

    pub async fn call_method(&self, method: Method) -> IpcResult<Response> {
        self.call(Request::new(method)).await
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolve once the peer has closed the connection.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the write side. The reader finishes once the peer hangs up.
    pub async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl Drop for IpcConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_responses(
    reader: OwnedReadHalf,
    pending: PendingMap,
    closed_tx: watch::Sender<bool>,
) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Server closed connection");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match Response::from_json(trimmed) {
                    Ok(response) => match pending.lock().remove(&response.id) {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => debug!(id = %response.id, "Response for unknown request"),
                    },
                    Err(e) => warn!(error = %e, "Failed to parse response"),
                }
            }
            Err(e) => {
                debug!(error = %e, "Read error on connection");
                break;
            }
        }
    }

    let _ = closed_tx.send(true);
    // Dropping the senders fails every outstanding call.
    pending.lock().clear();
}
