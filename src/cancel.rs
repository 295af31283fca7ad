//! Cooperative cancellation shared between the interrupt handler and stages.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::InstallError;

/// What the interrupt handler should do after a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// First signal: stages stop at their next cancellation point.
    Graceful,
    /// Repeated signal: the tracked scratch directory is gone; exit now.
    Abort,
}

/// Flag set by the interrupt handler and polled by long-running stages.
///
/// The token also remembers the live scratch directory, so an abort that
/// bypasses destructors can still remove it.  Cloning shares both.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    scratch: Arc<Mutex<Option<PathBuf>>>,
}

impl CancelToken {
    /// Create a token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return [`InstallError::Interrupted`] once cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Interrupted`] if the token is cancelled.
    pub fn check(&self) -> Result<(), InstallError> {
        if self.is_cancelled() {
            return Err(InstallError::Interrupted);
        }
        Ok(())
    }

    /// Handle one interrupt signal.
    ///
    /// The first call cancels the token.  Any later call removes the tracked
    /// scratch directory and returns [`Interrupt::Abort`].
    pub fn interrupt(&self) -> Interrupt {
        if !self.flag.swap(true, Ordering::SeqCst) {
            return Interrupt::Graceful;
        }
        let tracked = self.scratch_slot().take();
        if let Some(dir) = tracked {
            let _ = std::fs::remove_dir_all(dir);
        }
        Interrupt::Abort
    }

    /// Record `dir` as the scratch directory to remove on abort.
    pub fn track_scratch(&self, dir: &Path) {
        *self.scratch_slot() = Some(dir.to_path_buf());
    }

    /// Forget the tracked scratch directory.
    pub fn release_scratch(&self) {
        self.scratch_slot().take();
    }

    /// The scratch directory currently tracked.
    #[must_use]
    pub fn tracked_scratch(&self) -> Option<PathBuf> {
        self.scratch_slot().clone()
    }

    fn scratch_slot(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.scratch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let handler_copy = token.clone();
        assert!(token.check().is_ok());
        handler_copy.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(InstallError::Interrupted)));
    }

    #[test]
    fn first_interrupt_only_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        token.track_scratch(dir.path());

        assert_eq!(token.interrupt(), Interrupt::Graceful);
        assert!(token.is_cancelled());
        assert!(dir.path().exists());
        assert_eq!(token.tracked_scratch().as_deref(), Some(dir.path()));
    }

    #[test]
    fn second_interrupt_removes_tracked_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("typegen-install-abc");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("typegenctl-linux-amd64.tar.gz"), b"partial").unwrap();
        let token = CancelToken::new();
        let handler_copy = token.clone();
        token.track_scratch(&scratch);

        assert_eq!(handler_copy.interrupt(), Interrupt::Graceful);
        assert_eq!(handler_copy.interrupt(), Interrupt::Abort);

        assert!(!scratch.exists());
        assert_eq!(token.tracked_scratch(), None);
    }

    #[test]
    fn released_scratch_survives_abort() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        token.track_scratch(dir.path());
        token.release_scratch();

        token.cancel();
        assert_eq!(token.interrupt(), Interrupt::Abort);
        assert!(dir.path().exists());
    }
}
