//! Application identity.
//!
//! Every process of an application (UI, daemon, supervisor) shares one
//! identity. It scopes the on-disk vault and names the IPC interface a client
//! binds to, so two applications on the same machine never see each other's
//! sessions.

use crate::{CoreError, CoreResult};
use std::fmt;

/// Environment variable consulted when no identity is passed explicitly.
pub const APP_ID_ENV: &str = "SESSION_APP_ID";

/// Suffix appended to the app id to form the bind interface descriptor.
pub const SERVICE_INTERFACE_SUFFIX: &str = ".ISessionService";

/// Validated application identity (e.g. `com.example.notes`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppIdentity {
    app_id: String,
}

impl AppIdentity {
    /// Create an identity, validating its shape.
    pub fn new(app_id: impl Into<String>) -> CoreResult<Self> {
        let app_id = app_id.into();
        let trimmed = app_id.trim();

        if trimmed.is_empty() {
            return Err(CoreError::InvalidIdentity("app id is empty".to_string()));
        }
        if trimmed.starts_with('.') || trimmed.ends_with('.') || trimmed.contains("..") {
            return Err(CoreError::InvalidIdentity(format!(
                "'{}' has an empty segment",
                trimmed
            )));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(CoreError::InvalidIdentity(format!(
                "'{}' contains unsupported character {:?}",
                trimmed, bad
            )));
        }

        Ok(Self {
            app_id: trimmed.to_string(),
        })
    }

    /// Resolve the identity of the current application.
    ///
    /// Order: explicit value, then `SESSION_APP_ID`, then the running
    /// executable's file stem.
    pub fn resolve(explicit: Option<&str>) -> CoreResult<Self> {
        if let Some(app_id) = explicit {
            return Self::new(app_id);
        }

        if let Ok(app_id) = std::env::var(APP_ID_ENV) {
            if !app_id.trim().is_empty() {
                return Self::new(app_id);
            }
        }

        let exe = std::env::current_exe()?;
        let stem = exe
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                CoreError::InvalidIdentity(format!(
                    "cannot derive app id from executable {}",
                    exe.display()
                ))
            })?;
        Self::new(stem)
    }

    /// The raw app id.
    pub fn as_str(&self) -> &str {
        &self.app_id
    }

    /// Interface descriptor a client presents when binding to the service.
    pub fn interface_descriptor(&self) -> String {
        format!("{}{}", self.app_id, SERVICE_INTERFACE_SUFFIX)
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_descriptor_uses_own_identity() {
        let identity = AppIdentity::new("com.example.notes").unwrap();
        assert_eq!(
            identity.interface_descriptor(),
            "com.example.notes.ISessionService"
        );
    }

    #[test]
    fn test_explicit_identity_wins() {
        let identity = AppIdentity::resolve(Some("org.acme.mail")).unwrap();
        assert_eq!(identity.as_str(), "org.acme.mail");
    }

    #[test]
    fn test_identity_is_trimmed() {
        let identity = AppIdentity::new("  com.example.app \n").unwrap();
        assert_eq!(identity.to_string(), "com.example.app");
    }

    #[test]
    fn test_rejects_malformed_identities() {
        assert!(AppIdentity::new("").is_err());
        assert!(AppIdentity::new("   ").is_err());
        assert!(AppIdentity::new(".leading").is_err());
        assert!(AppIdentity::new("trailing.").is_err());
        assert!(AppIdentity::new("double..dot").is_err());
        assert!(AppIdentity::new("has/slash").is_err());
        assert!(AppIdentity::new("has space").is_err());
    }

    #[test]
    fn test_accepts_executable_style_names() {
        assert!(AppIdentity::new("session-daemon").is_ok());
        assert!(AppIdentity::new("my_app.v2").is_ok());
    }
}
