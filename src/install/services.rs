//! Service supervision descriptors: a systemd unit and a compose file.
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;

use super::config_doc::{API_PORT, DASHBOARD_PORT};
use super::layout::AppLayout;
use super::version::ReleaseVersion;
use crate::error::InstallError;
use crate::exec::{Executor, ExecutorExt as _};
use crate::logging::Log;

/// Unit file name.
pub const UNIT_NAME: &str = "typegen.service";

/// Private network shared by the compose services.
pub const COMPOSE_NETWORK: &str = "typegen";

/// Base image the compose `api` service runs the bind-mounted binary in.
pub const RUNTIME_IMAGE: &str = "debian:bookworm-slim";

/// Paths a descriptor was written to and refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorFile {
    /// Where the descriptor was written.
    pub path: PathBuf,
    /// Installed binary the descriptor starts.
    pub binary_path: PathBuf,
    /// Environment file the descriptor loads.
    pub env_file: PathBuf,
}

/// A generated service descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceDescriptor {
    /// Host service-manager unit.
    Supervisor(DescriptorFile),
    /// Container-orchestration file.
    ComposeFallback(DescriptorFile),
}

impl ServiceDescriptor {
    /// The underlying file record.
    #[must_use]
    pub const fn file(&self) -> &DescriptorFile {
        match self {
            Self::Supervisor(f) | Self::ComposeFallback(f) => f,
        }
    }

    /// Short kind name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Supervisor(_) => "systemd unit",
            Self::ComposeFallback(_) => "compose file",
        }
    }
}

/// Render the systemd unit.
#[must_use]
pub fn render_unit(binary: &Path, env_file: &Path, layout: &AppLayout, user: Option<&str>) -> String {
    let bin = binary.display();
    let mut unit = format!(
        "\
[Unit]
Description=typegen API and code generation service
Documentation=https://typegen.dev/docs
After=network-online.target docker.service
Wants=network-online.target docker.service
StartLimitIntervalSec=300
StartLimitBurst=5

[Service]
Type=simple
EnvironmentFile={env}
WorkingDirectory={home}
ExecStart={bin} start
ExecStop={bin} stop
ExecReload={bin} restart
Restart=always
RestartSec=5
LimitNOFILE=65536
MemoryMax=2G
CPUQuota=200%
",
        env = env_file.display(),
        home = layout.home.display(),
    );
    if let Some(user) = user {
        let _ = write!(unit, "User={user}\nGroup={user}\n");
    }
    unit.push_str("\n[Install]\nWantedBy=multi-user.target\n");
    unit
}

#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<&'static str, ComposeService>,
    networks: BTreeMap<&'static str, ComposeNetwork>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    command: Vec<String>,
    restart: &'static str,
    ports: Vec<String>,
    env_file: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<&'static str>,
    networks: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct ComposeNetwork {
    driver: &'static str,
}

/// Render the compose file.
///
/// # Errors
///
/// Returns an error if YAML serialization fails.
pub fn render_compose(
    binary: &Path,
    env_file: &Path,
    layout: &AppLayout,
    version: &ReleaseVersion,
) -> anyhow::Result<String> {
    let bin = binary.display().to_string();
    let env = env_file.display().to_string();

    let api = ComposeService {
        image: RUNTIME_IMAGE.to_string(),
        command: vec![bin.clone(), "start".to_string()],
        restart: "unless-stopped",
        ports: vec![format!("{API_PORT}:{API_PORT}")],
        env_file: vec![env.clone()],
        environment: BTreeMap::new(),
        volumes: vec![
            format!("{bin}:{bin}:ro"),
            format!("{}:/var/lib/typegen", layout.data_dir().display()),
            format!("{}:/var/log/typegen", layout.logs_dir().display()),
            format!("{}:/etc/typegen:ro", layout.config_dir().display()),
        ],
        depends_on: Vec::new(),
        networks: vec![COMPOSE_NETWORK],
    };

    let dashboard = ComposeService {
        image: format!("ghcr.io/typegen-dev/typegen-dashboard:{version}"),
        command: Vec::new(),
        restart: "unless-stopped",
        ports: vec![format!("{DASHBOARD_PORT}:{DASHBOARD_PORT}")],
        env_file: vec![env],
        environment: BTreeMap::from([("TYPEGEN_API_URL", format!("http://api:{API_PORT}"))]),
        volumes: Vec::new(),
        depends_on: vec!["api"],
        networks: vec![COMPOSE_NETWORK],
    };

    let file = ComposeFile {
        services: BTreeMap::from([("api", api), ("dashboard", dashboard)]),
        networks: BTreeMap::from([(COMPOSE_NETWORK, ComposeNetwork { driver: "bridge" })]),
    };
    serde_yaml::to_string(&file).context("serializing compose file")
}

/// Writes the service descriptors.
pub struct ServiceDescriptorGenerator<'a> {
    executor: &'a dyn Executor,
    log: &'a dyn Log,
    unit_dir: &'a Path,
}

impl std::fmt::Debug for ServiceDescriptorGenerator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptorGenerator")
            .field("unit_dir", &self.unit_dir)
            .finish_non_exhaustive()
    }
}

impl<'a> ServiceDescriptorGenerator<'a> {
    /// Create a generator writing the unit into `unit_dir`.
    #[must_use]
    pub const fn new(executor: &'a dyn Executor, log: &'a dyn Log, unit_dir: &'a Path) -> Self {
        Self {
            executor,
            log,
            unit_dir,
        }
    }

    /// Write the unit (when the host supports it) and the compose file.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Io`] if the compose file cannot be written.
    /// Unit problems are warnings.
    pub fn generate(
        &self,
        binary: &Path,
        layout: &AppLayout,
        version: &ReleaseVersion,
        user: Option<&str>,
    ) -> Result<Vec<ServiceDescriptor>, InstallError> {
        let env_file = layout.env_file();
        let mut descriptors = Vec::new();

        match self.write_unit(binary, &env_file, layout, user) {
            Ok(Some(d)) => descriptors.push(d),
            Ok(None) => {}
            Err(e) => self.log.warn(&format!("systemd unit not written: {e:#}")),
        }

        let path = layout.compose_file();
        let yaml = render_compose(binary, &env_file, layout, version)?;
        fs::write(&path, yaml).with_context(|| format!("writing {}", path.display()))?;
        self.log.info(&format!("wrote compose file {}", path.display()));
        descriptors.push(ServiceDescriptor::ComposeFallback(DescriptorFile {
            path,
            binary_path: binary.to_path_buf(),
            env_file,
        }));

        Ok(descriptors)
    }

    fn write_unit(
        &self,
        binary: &Path,
        env_file: &Path,
        layout: &AppLayout,
        user: Option<&str>,
    ) -> anyhow::Result<Option<ServiceDescriptor>> {
        if !self.executor.which("systemctl") {
            self.log.warn("systemctl not found; skipping systemd unit");
            return Ok(None);
        }
        if !self.unit_dir.is_dir() {
            self.log.warn(&format!(
                "{} does not exist; skipping systemd unit",
                self.unit_dir.display()
            ));
            return Ok(None);
        }

        let path = self.unit_dir.join(UNIT_NAME);
        fs::write(&path, render_unit(binary, env_file, layout, user))
            .with_context(|| format!("writing {}", path.display()))?;
        if let Err(e) = self.executor.run("systemctl", &["daemon-reload"]) {
            self.log.warn(&format!("systemctl daemon-reload failed: {e:#}"));
        }
        self.log.info(&format!("wrote systemd unit {}", path.display()));
        Ok(Some(ServiceDescriptor::Supervisor(DescriptorFile {
            path,
            binary_path: binary.to_path_buf(),
            env_file: env_file.to_path_buf(),
        })))
    }
}
