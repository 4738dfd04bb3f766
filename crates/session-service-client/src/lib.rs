//! Client side of the session service.
//!
//! [`SessionServiceClient`] binds to the service through a [`ServiceBinder`],
//! tracks the connection in a [`ConnectionState`] and turns every failure of
//! the five session operations into a safe default.

mod binder;
mod client;
mod socket;

pub use binder::{BindRejected, BoundService, ServiceBinder};
pub use client::{ConnectionSink, SessionServiceClient};
pub use socket::{SocketBinder, SocketService};

use session_ipc::IpcError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// A bind was accepted and its connection callback is outstanding.
    Binding,
    Connected,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not connected to the session service")]
    NotConnected,
    #[error("Transport error: {0}")]
    Transport(#[from] IpcError),
    #[error("Service error {code}: {message}")]
    Remote { code: i32, message: String },
}

pub type ClientResult<T> = Result<T, ClientError>;
