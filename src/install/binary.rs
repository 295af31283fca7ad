//! Verification and placement of the located binary.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;

use crate::error::InstallError;
use crate::exec::Executor;
use crate::logging::Log;

/// Flags tried in order when self-checking the binary.
pub const INTROSPECTION_FLAGS: &[&str] = &["--version", "version", "-V", "--help"];

/// How long one introspection flag may run before the binary is killed.
pub const SELF_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Mode given to the installed binary.
pub const BINARY_MODE: u32 = 0o755;

/// The binary at its final location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBinary {
    /// Canonical install path.
    pub path: PathBuf,
    /// Permission bits applied.
    pub mode: u32,
}

/// Verifies and installs the binary.
pub struct Installer<'a> {
    executor: &'a dyn Executor,
    log: &'a dyn Log,
    timeout: Duration,
}

impl std::fmt::Debug for Installer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<'a> Installer<'a> {
    /// Create an installer.
    #[must_use]
    pub const fn new(executor: &'a dyn Executor, log: &'a dyn Log) -> Self {
        Self {
            executor,
            log,
            timeout: SELF_CHECK_TIMEOUT,
        }
    }

    /// Override [`SELF_CHECK_TIMEOUT`].
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check that `path` is a runnable binary.
    ///
    /// Sets the executable bit when missing, then runs the binary with each
    /// of [`INTROSPECTION_FLAGS`] until one succeeds.  Each attempt is
    /// killed after the installer's timeout.  A binary that answers none of
    /// them is reported as a warning only; the returned string is the first
    /// line of output when a flag succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Precondition`] if `path` does not exist, or
    /// [`InstallError::Io`] if its permissions cannot be changed.
    pub fn verify(&self, path: &Path) -> Result<Option<String>, InstallError> {
        if !path.is_file() {
            return Err(InstallError::Precondition(format!(
                "binary not found at {}",
                path.display()
            )));
        }
        ensure_executable(path)?;

        let program = path.to_string_lossy();
        for flag in INTROSPECTION_FLAGS.iter().copied() {
            match self.executor.run_bounded(&program, &[flag], self.timeout) {
                Ok(result) if result.success => {
                    let banner = result.stdout.lines().next().unwrap_or_default().trim().to_string();
                    self.log.debug(&format!("self-check '{flag}' succeeded: {banner}"));
                    return Ok(Some(banner));
                }
                Ok(result) => self.log.debug(&format!(
                    "self-check '{flag}' exited {}",
                    result.code.unwrap_or(-1)
                )),
                Err(e) => self.log.debug(&format!("self-check '{flag}' failed: {e:#}")),
            }
        }
        self.log.warn(&format!(
            "{} did not answer any of {}; continuing",
            path.display(),
            INTROSPECTION_FLAGS.join(", ")
        ));
        Ok(None)
    }

    /// Copy `source` to `target` through a `.new` sibling and a rename.
    ///
    /// An existing `target` is replaced silently.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Io`] if any filesystem step fails; the
    /// temporary file is removed in that case.
    pub fn install(&self, source: &Path, target: &Path) -> Result<InstalledBinary, InstallError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let tmp = tmp_path(target);
        let result = place(source, &tmp, target);
        if result.is_err() && tmp.exists() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        self.log.debug(&format!("installed {}", target.display()));
        Ok(InstalledBinary {
            path: target.to_path_buf(),
            mode: BINARY_MODE,
        })
    }
}

fn place(source: &Path, tmp: &Path, target: &Path) -> anyhow::Result<()> {
    fs::copy(source, tmp)
        .with_context(|| format!("copying {} to {}", source.display(), tmp.display()))?;
    set_mode(tmp, BINARY_MODE)?;
    fs::rename(tmp, target).with_context(|| format!("installing {}", target.display()))?;
    Ok(())
}

/// `{target}.new`, next to `target`.
fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map_or_else(|| super::BINARY_NAME.into(), std::ffi::OsStr::to_os_string);
    name.push(".new");
    target.with_file_name(name)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting mode {mode:o} on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)
        .with_context(|| format!("reading {}", path.display()))?
        .permissions()
        .mode();
    if mode & 0o111 == 0 {
        set_mode(path, (mode & 0o7777) | 0o755)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
