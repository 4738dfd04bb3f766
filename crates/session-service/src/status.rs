//! Foreground status indicator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Persistent low-importance indicator shown while the service is foreground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusIndicator {
    pub channel: String,
    pub importance: String,
    pub title: String,
    pub text: String,
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self {
            channel: "session-service".to_string(),
            importance: "low".to_string(),
            title: "Session Service".to_string(),
            text: "Authentication service running".to_string(),
        }
    }
}

/// Contents of `status.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(flatten)]
    pub indicator: StatusIndicator,
    pub pid: u32,
    pub since: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(indicator: &StatusIndicator) -> Self {
        Self {
            indicator: indicator.clone(),
            pid: std::process::id(),
            since: Utc::now(),
        }
    }

    /// Publish via temp file and rename so readers never see a partial record.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(self)?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)
    }

    pub fn read_from(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
