//! System account resource for the service user.
use anyhow::Result;
use std::path::{Path, PathBuf};

use super::{Resource, ResourceChange, ResourceState};
use crate::exec::{Executor, ExecutorExt as _};

/// A system account that runs the managed service.
pub struct ServiceUserResource<'a> {
    /// Account name.
    pub name: String,
    /// Home directory recorded for the account (not created).
    pub home: PathBuf,
    executor: &'a dyn Executor,
}

impl std::fmt::Debug for ServiceUserResource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceUserResource")
            .field("name", &self.name)
            .field("home", &self.home)
            .finish_non_exhaustive()
    }
}

impl<'a> ServiceUserResource<'a> {
    /// Create a new service user resource.
    #[must_use]
    pub fn new(name: &str, home: PathBuf, executor: &'a dyn Executor) -> Self {
        Self {
            name: name.to_string(),
            home,
            executor,
        }
    }

    /// Recursively hand `path` over to the account.
    ///
    /// # Errors
    ///
    /// Returns an error if `chown` cannot be run or fails.
    pub fn chown_tree(&self, path: &Path) -> Result<()> {
        let owner = format!("{0}:{0}", self.name);
        let path = path.to_string_lossy();
        self.executor.run("chown", &["-R", &owner, &path])?;
        Ok(())
    }
}

impl Resource for ServiceUserResource<'_> {
    fn description(&self) -> String {
        format!("system user {}", self.name)
    }

    fn current_state(&self) -> Result<ResourceState> {
        let result = self.executor.run_unchecked("id", &["-u", &self.name])?;
        if result.success {
            Ok(ResourceState::Correct)
        } else {
            Ok(ResourceState::Missing)
        }
    }

    fn apply(&self) -> Result<ResourceChange> {
        if !self.executor.which("useradd") {
            return Ok(ResourceChange::Skipped {
                reason: "useradd not available".to_string(),
            });
        }
        let home = self.home.to_string_lossy();
        self.executor.run(
            "useradd",
            &[
                "--system",
                "--no-create-home",
                "--home-dir",
                &home,
                "--shell",
                "/usr/sbin/nologin",
                &self.name,
            ],
        )?;
        Ok(ResourceChange::Applied)
    }
}
