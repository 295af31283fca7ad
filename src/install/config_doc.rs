//! The versioned configuration document and the environment file.
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use super::layout::AppLayout;
use super::version::ReleaseVersion;
use crate::error::InstallError;
use crate::logging::Log;

/// Mode of the configuration document and the environment file.
pub const SECRET_FILE_MODE: u32 = 0o600;

/// API port.
pub const API_PORT: u16 = 8080;

/// Dashboard port.
pub const DASHBOARD_PORT: u16 = 3000;

/// Default database connection string.
pub const DEFAULT_DATABASE_URL: &str = "postgres://typegen@localhost:5432/typegen";

/// Default cache connection string.
pub const DEFAULT_CACHE_URL: &str = "redis://localhost:6379/0";

/// Serialized shape of `typegen.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Release the document was generated for.
    pub version: String,
    /// Deployment mode, e.g. `production`.
    pub mode: String,
    /// API server settings.
    pub server: ServerSection,
    /// Dashboard settings.
    pub dashboard: DashboardSection,
    /// Resource hints for the supervisor.
    pub resources: ResourcesSection,
    /// Health check settings.
    pub health: HealthSection,
    /// Database connection.
    pub database: UrlSection,
    /// Cache connection.
    pub cache: UrlSection,
    /// Data locations.
    pub paths: PathsSection,
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

/// `[dashboard]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSection {
    /// Whether the dashboard is served.
    pub enabled: bool,
    /// Bind port.
    pub port: u16,
}

/// `[resources]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesSection {
    /// Memory ceiling, e.g. `2G`.
    pub memory_limit: String,
    /// CPU quota in percent of one core.
    pub cpu_quota_percent: u32,
    /// Worker threads; `0` means one per core.
    pub workers: u32,
}

/// `[health]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSection {
    /// HTTP path answered by the API.
    pub path: String,
    /// Health check interval in seconds.
    pub interval_secs: u32,
}

/// `[database]` and `[cache]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlSection {
    /// Connection string, usually an environment placeholder.
    pub url: String,
}

/// `[paths]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsSection {
    /// Data directory.
    pub data: PathBuf,
    /// Log directory.
    pub logs: PathBuf,
    /// Plugin directory.
    pub plugins: PathBuf,
}

impl ConfigFile {
    /// Default document for `version` in `mode`.
    #[must_use]
    pub fn new(version: &ReleaseVersion, mode: &str, layout: &AppLayout) -> Self {
        Self {
            version: version.as_str().to_string(),
            mode: mode.to_string(),
            server: ServerSection {
                host: "0.0.0.0".to_string(),
                port: API_PORT,
            },
            dashboard: DashboardSection {
                enabled: true,
                port: DASHBOARD_PORT,
            },
            resources: ResourcesSection {
                memory_limit: "2G".to_string(),
                cpu_quota_percent: 200,
                workers: 0,
            },
            health: HealthSection {
                path: "/health".to_string(),
                interval_secs: 30,
            },
            database: UrlSection {
                url: placeholder("DATABASE_URL", DEFAULT_DATABASE_URL),
            },
            cache: UrlSection {
                url: placeholder("REDIS_URL", DEFAULT_CACHE_URL),
            },
            paths: PathsSection {
                data: layout.data_dir(),
                logs: layout.logs_dir(),
                plugins: layout.plugins_dir(),
            },
        }
    }
}

/// `${VAR:-default}` placeholder resolved by the service at start-up.
fn placeholder(var: &str, default: &str) -> String {
    format!("${{{var}:-{default}}}")
}

/// The configuration document after generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    /// Path of the live document.
    pub path: PathBuf,
    /// Version written into the document.
    pub embedded_version: String,
    /// Copy of the previous document, when one existed.
    pub backup_path: Option<PathBuf>,
    /// Version of the previous document, when it differed.
    pub upgraded_from: Option<String>,
}

/// Generates the configuration document and environment file.
pub struct ConfigManager<'a> {
    layout: &'a AppLayout,
    mode: &'a str,
    log: &'a dyn Log,
}

impl std::fmt::Debug for ConfigManager<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("layout", &self.layout)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<'a> ConfigManager<'a> {
    /// Create a manager writing backups under `layout`'s backups directory.
    #[must_use]
    pub const fn new(layout: &'a AppLayout, mode: &'a str, log: &'a dyn Log) -> Self {
        Self { layout, mode, log }
    }

    /// Write a fresh document for `version` at `path`.
    ///
    /// An existing document is copied to the backups directory first, every
    /// time.  A differing previous `version` is reported as an upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Io`] if the backup or the write fails; the
    /// live document is untouched when the backup fails.
    pub fn generate(
        &self,
        version: &ReleaseVersion,
        path: &Path,
    ) -> Result<ConfigDocument, InstallError> {
        let mut backup_path = None;
        let mut upgraded_from = None;

        if path.exists() {
            backup_path = Some(self.backup(path)?);
            match previous_version(path) {
                Ok(previous) if previous != version.as_str() => {
                    self.log.info(&format!(
                        "upgrading configuration from {previous} to {version}"
                    ));
                    upgraded_from = Some(previous);
                }
                Ok(_) => {}
                Err(e) => self.log.warn(&format!(
                    "previous configuration is unreadable ({e:#}); replacing it"
                )),
            }
        }

        let document = ConfigFile::new(version, self.mode, self.layout);
        let text = toml::to_string_pretty(&document).context("serializing configuration")?;
        write_secret(path, &format!("{}{text}", header(version)))?;

        Ok(ConfigDocument {
            path: path.to_path_buf(),
            embedded_version: document.version,
            backup_path,
            upgraded_from,
        })
    }

    /// Copy `path` to `{backups}/{file}.{timestamp}.bak`.
    ///
    /// A numeric suffix is added when the name is already taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the backups directory cannot be created or the
    /// copy fails.
    pub fn backup(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let dir = self.layout.backups_dir();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let file_name = path
            .file_name()
            .map_or_else(|| "config".into(), |n| n.to_string_lossy());
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let mut candidate = dir.join(format!("{file_name}.{stamp}.bak"));
        let mut n = 1u32;
        while candidate.exists() {
            candidate = dir.join(format!("{file_name}.{stamp}.{n}.bak"));
            n += 1;
        }

        fs::copy(path, &candidate).with_context(|| {
            format!("backing up {} to {}", path.display(), candidate.display())
        })?;
        set_mode(&candidate, SECRET_FILE_MODE)?;
        self.log
            .info(&format!("backed up configuration to {}", candidate.display()));
        Ok(candidate)
    }

    /// Write the environment file at `path` unless it already exists.
    ///
    /// Returns whether a file was written.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Io`] if the write fails.
    pub fn write_env_file(&self, version: &ReleaseVersion, path: &Path) -> Result<bool, InstallError> {
        if path.exists() {
            self.log.info(&format!(
                "keeping existing environment file {}",
                path.display()
            ));
            return Ok(false);
        }
        write_secret(path, &self.env_contents(version))?;
        Ok(true)
    }

    fn env_contents(&self, version: &ReleaseVersion) -> String {
        let layout = self.layout;
        let vars = [
            ("TYPEGEN_MODE", self.mode.to_string()),
            ("TYPEGEN_HOST", "0.0.0.0".to_string()),
            ("TYPEGEN_PORT", API_PORT.to_string()),
            ("TYPEGEN_DASHBOARD_PORT", DASHBOARD_PORT.to_string()),
            ("TYPEGEN_CONFIG", layout.config_file().display().to_string()),
            ("TYPEGEN_DATA_DIR", layout.data_dir().display().to_string()),
            ("TYPEGEN_LOG_DIR", layout.logs_dir().display().to_string()),
            ("DATABASE_URL", DEFAULT_DATABASE_URL.to_string()),
            ("REDIS_URL", DEFAULT_CACHE_URL.to_string()),
        ];
        let mut out = header(version);
        for (key, value) in vars {
            let _ = writeln!(out, "{key}={value}");
        }
        out
    }
}

fn header(version: &ReleaseVersion) -> String {
    format!(
        "# Generated by typegen-install for typegen {version} on {}\n\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Read the `version` key of an existing document.
fn previous_version(path: &Path) -> anyhow::Result<String> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let table: toml::Table = text.parse().context("parsing TOML")?;
    table
        .get("version")
        .and_then(toml::Value::as_str)
        .map(str::to_string)
        .context("missing 'version' key")
}

/// Write `contents` to `path` through a temporary sibling.
///
/// The sibling is created with mode `0o600` and renamed over `path`, so the
/// file is never readable by other users, not even while being written.
fn write_secret(path: &Path, contents: &str) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".typegen-")
        .tempfile_in(parent)
        .with_context(|| format!("creating temporary file in {}", parent.display()))?;
    set_mode(tmp.path(), SECRET_FILE_MODE)?;
    tmp.write_all(contents.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("set permissions: {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}
