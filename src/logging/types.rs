//! Core logging types: check entries, status, and the [`Log`] trait.

/// Validation check result for summary reporting.
#[derive(Debug, Clone)]
pub struct CheckEntry {
    /// Human-readable check name.
    pub name: String,
    /// Final status of the check.
    pub status: CheckStatus,
    /// Optional detail message (e.g., skip reason or error description).
    pub message: Option<String>,
}

/// Status of a completed validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Predicate held.
    Passed,
    /// Predicate did not hold or errored.
    Failed,
    /// Prerequisite check did not pass; not counted.
    Skipped,
}

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) writes through `tracing`; tests use it
/// with an isolated subscriber.  Stage code logs through this trait so it
/// never depends on a concrete backend.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Record a validation check result for the summary.
    fn record_check(&self, name: &str, status: CheckStatus, message: Option<&str>);
}
