//! Configuration, paths, app identity and logging shared by every session
//! service process.

mod config;
mod error;
mod identity;
mod logging;
mod paths;

pub use config::{Config, StartModePreference, DEFAULT_LOG_LEVEL, DEFAULT_RELAUNCH_DELAY_MS};
pub use error::{CoreError, CoreResult};
pub use identity::{AppIdentity, SERVICE_INTERFACE_SUFFIX};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
