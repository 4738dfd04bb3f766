//! IPC layer between the session daemon, its supervisor and clients.
//!
//! This crate provides:
//! - Unix domain socket server with per-connection bind tracking
//! - JSON-RPC-like protocol, one JSON object per line
//! - One-shot [`IpcClient`] and persistent, multiplexed [`IpcConnection`]

mod connection;
mod error;
mod protocol;
mod server;

pub use connection::IpcConnection;
pub use error::{IpcError, IpcResult};
pub use protocol::{error_codes, ErrorInfo, Method, Request, Response, SESSION_OPERATIONS};
pub use server::{IpcClient, IpcServer};
