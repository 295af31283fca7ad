//! Domain-specific error types for the installer pipeline.
//!
//! Every fatal failure of a pipeline stage is an [`InstallError`].  Stage
//! internals attach I/O detail with [`anyhow::Context`] and convert into a
//! typed variant at the stage boundary, so `main` can pick the process exit
//! status from the variant alone.
//!
//! # Error hierarchy
//!
//! ```text
//! InstallError
//! ├── Precondition            : missing tool, insufficient privilege, missing file
//! ├── UnsupportedPlatform     : OS outside the supported set
//! ├── UnsupportedArchitecture : arch outside the alias table, no override
//! ├── VersionResolution       : every metadata endpoint failed
//! ├── Download                : retries exhausted
//! ├── CorruptArtifact         : undersized download or checksum mismatch
//! ├── Extraction              : archive could not be unpacked
//! ├── BinaryNotFound          : every locator strategy came up empty
//! ├── Io                      : filesystem failure while writing outputs
//! └── Interrupted             : SIGINT, SIGTERM or SIGHUP observed mid-run
//! ```

use thiserror::Error;

/// Exit status for an ordinary fatal failure.
pub const EXIT_FAILURE: i32 = 1;

/// Exit status when the run was interrupted by a signal (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;

/// Fatal error raised by a pipeline stage.
#[derive(Error, Debug)]
pub enum InstallError {
    /// A required tool, privilege or file is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The host operating system is not supported.
    #[error("unsupported platform '{os}': supported platforms are linux, darwin")]
    UnsupportedPlatform {
        /// Raw OS identifier reported by the host.
        os: String,
    },

    /// The host architecture is not in the alias table and no override was given.
    #[error(
        "unsupported architecture '{arch}': set TYPEGEN_ARCH to one of amd64, arm64, armv7 to override"
    )]
    UnsupportedArchitecture {
        /// Raw architecture identifier reported by the host.
        arch: String,
    },

    /// No metadata endpoint yielded a release version.
    #[error("could not resolve release version: {0}")]
    VersionResolution(String),

    /// The artifact could not be downloaded within the retry budget.
    #[error("download of {url} failed after {attempts} attempt(s): {reason}")]
    Download {
        /// URL that was requested.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Reason reported by the last attempt.
        reason: String,
    },

    /// The downloaded artifact is not usable.
    #[error("corrupt artifact {path}: {reason}")]
    CorruptArtifact {
        /// Local path of the rejected artifact.
        path: String,
        /// Why the artifact was rejected.
        reason: String,
    },

    /// The archive could not be unpacked.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// No locator strategy found a candidate in the extracted tree.
    #[error("binary '{binary}' not found in archive; extracted files:\n{listing}")]
    BinaryNotFound {
        /// Expected binary name.
        binary: String,
        /// Newline-separated listing of every extracted path.
        listing: String,
    },

    /// A filesystem operation on an output path failed.
    #[error("{0:#}")]
    Io(#[from] anyhow::Error),

    /// The run was cancelled by an interrupt signal.
    #[error("installation interrupted")]
    Interrupted,
}

impl InstallError {
    /// Process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }
}
