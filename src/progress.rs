//! Progress reporting for long-running stages (download, extraction).
//!
//! Stages receive a `&dyn Progress` and never depend on whether anything is
//! drawn.  [`NoProgress`] is used for headless runs and tests; [`Spinner`]
//! draws an `indicatif` bar whose steady tick runs on a background thread.
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Interval at which the spinner redraws while an operation is running.
const TICK_INTERVAL: Duration = Duration::from_millis(120);

/// Receives progress events from a long-running operation.
///
/// All methods default to no-ops.
pub trait Progress: Send + Sync {
    /// An operation named `label` started; `total` is its size when known.
    fn begin(&self, _label: &str, _total: Option<u64>) {}
    /// `done` units of the current operation have completed.
    fn advance(&self, _done: u64) {}
    /// The current operation completed successfully.
    fn finish(&self) {}
    /// The current operation failed or was cancelled.
    fn abandon(&self) {}
}

/// Progress sink that draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Terminal progress indicator.
#[derive(Default)]
pub struct Spinner {
    bar: Mutex<Option<ProgressBar>>,
}

impl fmt::Debug for Spinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinner").field("bar", &"<ProgressBar>").finish()
    }
}

impl Spinner {
    /// Create an idle spinner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> Option<ProgressBar> {
        self.slot().take()
    }
}

impl Progress for Spinner {
    fn begin(&self, label: &str, total: Option<u64>) {
        let bar = total.map_or_else(ProgressBar::new_spinner, |len| {
            let bar = ProgressBar::new(len);
            if let Ok(style) =
                ProgressStyle::with_template("  {spinner} {msg} [{bar:30}] {bytes}/{total_bytes}")
            {
                bar.set_style(style.progress_chars("=> "));
            }
            bar
        });
        bar.set_message(label.to_string());
        bar.enable_steady_tick(TICK_INTERVAL);
        let previous = self.slot().replace(bar);
        if let Some(previous) = previous {
            previous.finish_and_clear();
        }
    }

    fn advance(&self, done: u64) {
        let current = self.slot().clone();
        if let Some(bar) = current {
            bar.set_position(done);
        }
    }

    fn finish(&self) {
        if let Some(bar) = self.take() {
            let label = bar.message();
            bar.finish_and_clear();
            bar.println(format!("  \x1b[32m✓\x1b[0m {label}"));
        }
    }

    fn abandon(&self) {
        if let Some(bar) = self.take() {
            bar.abandon();
        }
    }
}
