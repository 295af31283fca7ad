//! Structured logger with validation-summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::subscriber::STAGE_TARGET;
use super::types::{CheckEntry, CheckStatus, Log};
use super::utils::log_file_path;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
///
/// The `record_check` method is **not** included because its signature
/// differs from the `fn(&self, &str)` pattern shared by the display methods.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Structured logger with summary collection.
///
/// Console and file output both go through `tracing`; the file layer set up
/// by [`init_subscriber`](super::subscriber::init_subscriber) writes every
/// message to `$XDG_CACHE_HOME/typegen/<command>.log` regardless of the
/// verbose flag.
#[derive(Debug)]
pub struct Logger {
    checks: Mutex<Vec<CheckEntry>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger for `command`.
    ///
    /// Stores the log file path for display in the run summary; the file
    /// itself is created by the subscriber's file layer.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            checks: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Create a logger that reports `path` as its log file.
    #[cfg(test)]
    pub(crate) const fn with_log_file(path: PathBuf) -> Self {
        Self {
            checks: Mutex::new(Vec::new()),
            log_file: Some(path),
        }
    }

    /// Return the log file path, if available.
    #[must_use]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded check entries.
    #[must_use]
    pub fn check_entries(&self) -> Vec<CheckEntry> {
        self.checks.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Record a validation check result for the summary.
    pub fn record_check(&self, name: &str, status: CheckStatus, message: Option<&str>) {
        if let Ok(mut guard) = self.checks.lock() {
            guard.push(CheckEntry {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Print the summary of all recorded checks.
    pub fn print_summary(&self) {
        let checks = self.check_entries();
        if checks.is_empty() {
            return;
        }

        self.stage("Summary");

        let mut passed = 0u32;
        let mut failed = 0u32;
        let mut skipped = 0u32;

        for check in &checks {
            let (icon, color) = match check.status {
                CheckStatus::Passed => {
                    passed += 1;
                    ("✓", "\x1b[32m")
                }
                CheckStatus::Failed => {
                    failed += 1;
                    ("✗", "\x1b[31m")
                }
                CheckStatus::Skipped => {
                    skipped += 1;
                    ("○", "\x1b[33m")
                }
            };

            let suffix = check
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));

            self.info(&format!("{color}{icon} {}{suffix}\x1b[0m", check.name));
        }

        let total = passed + failed;
        self.info(&format!(
            "{passed}/{total} checks passed: \x1b[31m{failed} failed\x1b[0m, \x1b[33m{skipped} skipped\x1b[0m"
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error);

    fn record_check(&self, name: &str, status: CheckStatus, message: Option<&str>) {
        self.record_check(name, status, message);
    }
}
