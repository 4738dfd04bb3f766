//! The session service.
//!
//! A long-running process owns the application's [`TokenStore`] and exposes
//! five read/logout operations to bound clients. Its lifecycle (creation,
//! foreground promotion, relaunch after task removal, restart after destroy)
//! is decided by the pure machine in `service-lifecycle` and carried out
//! through [`HostPlatform`].
//!
//! [`TokenStore`]: session_storage::TokenStore

mod host;
pub mod ipc;
mod service;
mod status;

pub use host::{DaemonHost, HostPlatform};
pub use service::{SessionService, StoreFactory};
pub use status::{StatusIndicator, StatusRecord};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Session store unavailable: {0}")]
    Storage(#[from] session_storage::StorageError),

    #[error("Service is shutting down")]
    Destroying,
}

pub type ServiceResult<T> = Result<T, ServiceError>;
