//! Directory resource with an explicit permission mode.
use anyhow::{Context as _, Result};
use std::path::PathBuf;

use super::{Resource, ResourceChange, ResourceState};

/// A directory that must exist with an exact permission mode.
///
/// The mode is applied with an explicit `chmod` after creation so the
/// process umask never influences the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryResource {
    /// Directory path (absolute).
    pub path: PathBuf,
    /// Permission bits including special bits, e.g. `0o1777`.
    pub mode: u32,
}

impl DirectoryResource {
    /// Create a new directory resource.
    #[must_use]
    pub const fn new(path: PathBuf, mode: u32) -> Self {
        Self { path, mode }
    }
}

impl Resource for DirectoryResource {
    fn description(&self) -> String {
        format!("{:o} {}", self.mode, self.path.display())
    }

    fn current_state(&self) -> Result<ResourceState> {
        if !self.path.exists() {
            return Ok(ResourceState::Missing);
        }
        if !self.path.is_dir() {
            return Ok(ResourceState::Invalid {
                reason: format!("not a directory: {}", self.path.display()),
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let current = std::fs::metadata(&self.path)
                .with_context(|| format!("reading {}", self.path.display()))?
                .permissions()
                .mode()
                & 0o7777;
            if current == self.mode {
                Ok(ResourceState::Correct)
            } else {
                Ok(ResourceState::Incorrect {
                    current: format!("{current:o}"),
                })
            }
        }

        #[cfg(not(unix))]
        {
            Ok(ResourceState::Correct)
        }
    }

    fn apply(&self) -> Result<ResourceChange> {
        std::fs::create_dir_all(&self.path)
            .with_context(|| format!("creating directory {}", self.path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(self.mode))
                .with_context(|| format!("set permissions: {}", self.path.display()))?;
        }

        Ok(ResourceChange::Applied)
    }
}
