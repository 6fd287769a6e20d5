//! External status record
//!
//! A small key/value document a hosting agent reads to answer "am I
//! working?". The record always reflects the latest transition but is not
//! part of the protocol: writes are best-effort and failures only log.

use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use tracing::warn;

/// Best-effort writer for the worker status document
#[derive(Debug, Clone, Default)]
pub struct StatusRecorder {
    path: Option<PathBuf>,
}

impl StatusRecorder {
    /// Record into `path`; `None` disables recording entirely
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Recorder configured from `AGENTPAY_STATUS_FILE`
    pub fn from_env() -> Self {
        let path = std::env::var("AGENTPAY_STATUS_FILE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Self { path }
    }

    /// Write one transition: `idle`, `offered`, `working`, or `completed`
    pub fn record(&self, status: &str, task_type: Option<&str>, error: Option<&str>) {
        let Some(path) = &self.path else {
            return;
        };
        let document = json!({
            "status": status,
            "task_type": task_type.unwrap_or(""),
            "error": error,
            "updated_at": Utc::now().to_rfc3339(),
        });
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_vec_pretty(&document)?)
        };
        if let Err(e) = write() {
            warn!(path = %path.display(), error = %e, "status record write failed");
        }
    }
}
