//! Process entry points and lifecycle commands.

mod control;
mod daemon;
mod supervise;

pub use control::{check_status, stop_all};
pub use daemon::run_daemon;
pub use supervise::run_supervisor;
