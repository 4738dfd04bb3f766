//! The host bind primitive.

use crate::ConnectionSink;
use async_trait::async_trait;
use session_ipc::{IpcResult, Method, Response};
use thiserror::Error;

/// Why a bind request was refused up front.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindRejected {
    #[error("Unknown service interface: {0}")]
    UnknownInterface(String),
    #[error("Session service is not running")]
    ServiceUnavailable,
    #[error("No async runtime to complete the bind")]
    NoRuntime,
}

/// Starts a bind. Acceptance is synchronous; the outcome arrives later on
/// the sink.
pub trait ServiceBinder: Send + Sync {
    fn bind(&self, interface: &str, sink: ConnectionSink) -> Result<(), BindRejected>;
}

/// Handle to a bound service.
#[async_trait]
pub trait BoundService: Send + Sync {
    async fn call(&self, method: Method) -> IpcResult<Response>;

    /// Release the bind. Safe to call more than once.
    async fn unbind(&self);
}
