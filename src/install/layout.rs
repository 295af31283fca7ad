//! Application home layout and its provisioning.
use std::path::{Path, PathBuf};

use crate::error::InstallError;
use crate::exec::Executor;
use crate::logging::Log;
use crate::resources::directory::DirectoryResource;
use crate::resources::service_user::ServiceUserResource;
use crate::resources::{Resource, ResourceChange};

/// System account that owns the application home.
pub const SERVICE_USER: &str = "typegen";

/// Configuration document file name.
pub const CONFIG_FILE: &str = "typegen.toml";

/// Environment file name.
pub const ENV_FILE: &str = "typegen.env";

/// Compose descriptor file name.
pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Permission class of a managed directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirClass {
    /// World-readable: home root, `plugins`, `bin`.
    Public,
    /// Group-readable: `config`.
    Config,
    /// Owner only: `backups`.
    Private,
    /// Group-writable: `data`, `logs`.
    Shared,
    /// World-writable with the sticky bit: `tmp`.
    Scratch,
}

impl DirClass {
    /// Octal mode for the class.
    #[must_use]
    pub const fn mode(self) -> u32 {
        match self {
            Self::Public => 0o755,
            Self::Config => 0o750,
            Self::Private => 0o700,
            Self::Shared => 0o770,
            Self::Scratch => 0o1777,
        }
    }
}

/// Paths of the application home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLayout {
    /// Home root, e.g. `/opt/typegen`.
    pub home: PathBuf,
}

impl AppLayout {
    /// Layout rooted at `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Persistent application data.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.home.join("data")
    }

    /// Service logs.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Generator plugins.
    #[must_use]
    pub fn plugins_dir(&self) -> PathBuf {
        self.home.join("plugins")
    }

    /// Configuration directory.
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.home.join("config")
    }

    /// Configuration backups.
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.home.join("backups")
    }

    /// Shared scratch space.
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.home.join("tmp")
    }

    /// Optional helper binaries.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.home.join("bin")
    }

    /// The configuration document.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE)
    }

    /// The environment file.
    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.config_dir().join(ENV_FILE)
    }

    /// The compose descriptor.
    #[must_use]
    pub fn compose_file(&self) -> PathBuf {
        self.home.join(COMPOSE_FILE)
    }

    /// Every managed directory with its class, root first.
    #[must_use]
    pub fn directories(&self, include_bin: bool) -> Vec<(PathBuf, DirClass)> {
        let mut dirs = vec![
            (self.home.clone(), DirClass::Public),
            (self.data_dir(), DirClass::Shared),
            (self.logs_dir(), DirClass::Shared),
            (self.plugins_dir(), DirClass::Public),
            (self.config_dir(), DirClass::Config),
            (self.backups_dir(), DirClass::Private),
            (self.tmp_dir(), DirClass::Scratch),
        ];
        if include_bin {
            dirs.push((self.bin_dir(), DirClass::Public));
        }
        dirs
    }
}

/// Whether the process runs with root privileges (`id -u` is `0`).
#[must_use]
pub fn is_elevated(executor: &dyn Executor) -> bool {
    executor
        .run_unchecked("id", &["-u"])
        .is_ok_and(|r| r.success && r.stdout.trim() == "0")
}

/// Outcome of provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedLayout {
    /// The layout that was provisioned.
    pub layout: AppLayout,
    /// Directories whose state was changed.
    pub changed: Vec<PathBuf>,
    /// Owning account, when ownership was transferred.
    pub owner: Option<String>,
}

/// Creates the application home with its permission policy.
pub struct FilesystemProvisioner<'a> {
    executor: &'a dyn Executor,
    log: &'a dyn Log,
    include_bin: bool,
    service_user: bool,
}

impl std::fmt::Debug for FilesystemProvisioner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemProvisioner")
            .field("include_bin", &self.include_bin)
            .field("service_user", &self.service_user)
            .finish_non_exhaustive()
    }
}

impl<'a> FilesystemProvisioner<'a> {
    /// Create a provisioner; `service_user` enables account creation and
    /// ownership transfer when running as root.
    #[must_use]
    pub const fn new(executor: &'a dyn Executor, log: &'a dyn Log, service_user: bool) -> Self {
        Self {
            executor,
            log,
            include_bin: true,
            service_user,
        }
    }

    /// Skip the optional `bin` directory.
    #[must_use]
    pub const fn without_bin(mut self) -> Self {
        self.include_bin = false;
        self
    }

    /// Create every directory of `layout` with its mode, then hand the
    /// tree to the service account when possible.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Io`] if a directory cannot be created or its
    /// mode cannot be set.  Account and ownership problems are warnings.
    pub fn provision(&self, layout: &AppLayout) -> Result<ProvisionedLayout, InstallError> {
        let mut changed = Vec::new();
        for (path, class) in layout.directories(self.include_bin) {
            let resource = DirectoryResource::new(path.clone(), class.mode());
            match resource.ensure()? {
                ResourceChange::Applied => {
                    self.log.debug(&format!("applied {}", resource.description()));
                    changed.push(path);
                }
                ResourceChange::AlreadyCorrect => {}
                ResourceChange::Skipped { reason } => {
                    return Err(InstallError::Precondition(reason));
                }
            }
        }

        let owner = if self.service_user {
            self.assign_owner(&layout.home)
        } else {
            self.log.debug("service user disabled");
            None
        };

        Ok(ProvisionedLayout {
            layout: layout.clone(),
            changed,
            owner,
        })
    }

    /// Transfer the home to `owner` again, covering files written after
    /// [`Self::provision`] (configuration, environment file, backups and
    /// the compose descriptor).
    ///
    /// A failure is a warning.  Returns whether the transfer succeeded.
    pub fn hand_over(&self, layout: &AppLayout, owner: &str) -> bool {
        let user = ServiceUserResource::new(owner, layout.home.clone(), self.executor);
        match user.chown_tree(&layout.home) {
            Ok(()) => {
                self.log
                    .debug(&format!("{} handed over to {owner}", layout.home.display()));
                true
            }
            Err(e) => {
                self.log.warn(&format!(
                    "cannot transfer {} to {owner}: {e:#}",
                    layout.home.display()
                ));
                false
            }
        }
    }

    fn assign_owner(&self, home: &Path) -> Option<String> {
        if !is_elevated(self.executor) {
            self.log
                .debug("not running as root; leaving ownership with the current user");
            return None;
        }

        let user = ServiceUserResource::new(SERVICE_USER, home.to_path_buf(), self.executor);
        match user.ensure() {
            Ok(ResourceChange::Skipped { reason }) => {
                self.log
                    .warn(&format!("cannot create {}: {reason}", user.description()));
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                self.log
                    .warn(&format!("cannot create {}: {e:#}", user.description()));
                return None;
            }
        }

        if let Err(e) = user.chown_tree(home) {
            self.log.warn(&format!(
                "cannot transfer {} to {SERVICE_USER}: {e:#}",
                home.display()
            ));
            return None;
        }
        Some(SERVICE_USER.to_string())
    }
}
