// ─── Report Log ───
// Append-only diagnostic log correlated across supervisor generations.
// Event ids are stable: 1xxx informational, 2xxx success, 3xxx retry or
// escalation, 4xxx non-fatal error, 5xxx fatal error.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{error, info, warn};

/// Writer for the cross-generation `report.log`. Every line carries the
/// event id and the process id, since several generations append to the same
/// file. Writing is best-effort and never fails the caller.
pub struct ReportLog {
    path: Option<PathBuf>,
    pid: u32,
}

impl ReportLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: Some(data_dir.join("report.log")),
            pid: std::process::id(),
        }
    }

    /// A log that only mirrors to `tracing`, for tests.
    pub fn disabled() -> Self {
        Self {
            path: None,
            pid: std::process::id(),
        }
    }

    pub fn add(&self, event_id: u32, message: impl AsRef<str>) {
        let message = message.as_ref();
        match event_id / 1000 {
            4 => warn!(event_id, "{}", message),
            5 => error!(event_id, "{}", message),
            _ => info!(event_id, "{}", message),
        }

        let Some(path) = &self.path else {
            return;
        };
        let line = format!(
            "{} pid:{} {:04} {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            self.pid,
            event_id,
            message
        );
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if result.is_err() {
            // Nothing sensible left to do; the tracing mirror above already
            // carried the message.
        }
    }
}
