//! Restart supervisor for the session service.
//!
//! Runs as its own process. The session service calls it when it is torn
//! down (`supervisor.restart`) or when its task is removed
//! (`supervisor.schedule_relaunch`). At most one deferred relaunch is pending
//! at a time.

mod scheduler;
mod supervisor;

pub use scheduler::{DeferredTask, DelayedTaskScheduler, TokioScheduler};
pub use supervisor::{
    register_handlers, RestartOutcome, RestartSupervisor, ServiceStarter, QUIET_TIMEOUT,
};

use service_lifecycle::LifecycleError;
use session_ipc::IpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Launch failed: {0}")]
    Launch(#[from] LifecycleError),
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
