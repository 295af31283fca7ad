//! Top-level orchestration of an installation run.
//!
//! [`run`] sequences the stages of [`crate::install`], appending each
//! stage's product to an [`InstallContext`].  The scratch directory is a
//! [`tempfile::TempDir`] owned here, so it is removed on every exit path.
//! While it lives it is also tracked by the [`CancelToken`], which removes
//! it when a repeated interrupt aborts the process.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::cancel::CancelToken;
use crate::error::InstallError;
use crate::exec::Executor;
use crate::http::HttpClient;
use crate::install::archive;
use crate::install::binary::{InstalledBinary, Installer};
use crate::install::completion;
use crate::install::config_doc::{ConfigDocument, ConfigManager};
use crate::install::fetch::{ArtifactFetcher, FetchedArtifact, Sleeper};
use crate::install::layout::{AppLayout, FilesystemProvisioner, ProvisionedLayout};
use crate::install::locate::{BinaryLocator, LocatedBinary, Target};
use crate::install::services::{ServiceDescriptor, ServiceDescriptorGenerator};
use crate::install::telemetry::{self, Beacon};
use crate::install::version::{self, LATEST, ReleaseVersion, VersionResolver};
use crate::install::{BINARY_NAME, DEFAULT_REPO};
use crate::logging::Log;
use crate::platform::SystemProfile;
use crate::progress::Progress;
use crate::validate::{StandardChecks, ValidationReport};

/// Default directory receiving the binary.
pub const DEFAULT_INSTALL_DIR: &str = "/usr/local/bin";

/// Default application home.
pub const DEFAULT_HOME: &str = "/opt/typegen";

/// Default deployment mode written into the configuration.
pub const DEFAULT_MODE: &str = "production";

/// Default directory for the systemd unit.
pub const DEFAULT_SYSTEMD_DIR: &str = "/etc/systemd/system";

/// Default install beacon endpoint.
pub const DEFAULT_TELEMETRY_URL: &str = "https://telemetry.typegen.dev/v1/install";

/// URL requested by the connectivity check.
pub const DEFAULT_CONNECTIVITY_URL: &str = "https://api.github.com";

/// Immutable settings of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Requested release, or [`LATEST`].
    pub release: String,
    /// Architecture override.
    pub arch: Option<String>,
    /// Debug output on the console.
    pub verbose: bool,
    /// Disable the install beacon.
    pub no_telemetry: bool,
    /// Release repository (`owner/name`).
    pub repo: String,
    /// Directory receiving the binary.
    pub install_dir: PathBuf,
    /// Application home.
    pub home: PathBuf,
    /// Deployment mode.
    pub mode: String,
    /// Directory receiving the systemd unit.
    pub systemd_dir: PathBuf,
    /// Skip service-account creation and ownership transfer.
    pub no_service_user: bool,
    /// Metadata endpoints; empty means [`version::default_endpoints`].
    pub metadata_urls: Vec<String>,
    /// Asset base URL; `None` means the repository's release downloads.
    pub download_base: Option<String>,
    /// Install beacon endpoint.
    pub telemetry_url: String,
    /// URL requested by the connectivity check.
    pub connectivity_url: String,
    /// Parent of the scratch directory; `None` uses the system temp dir.
    pub scratch_base: Option<PathBuf>,
    /// Candidate bash completion directories.
    pub completion_dirs: Vec<PathBuf>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            release: LATEST.to_string(),
            arch: None,
            verbose: false,
            no_telemetry: false,
            repo: DEFAULT_REPO.to_string(),
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            home: PathBuf::from(DEFAULT_HOME),
            mode: DEFAULT_MODE.to_string(),
            systemd_dir: PathBuf::from(DEFAULT_SYSTEMD_DIR),
            no_service_user: false,
            metadata_urls: Vec::new(),
            download_base: None,
            telemetry_url: DEFAULT_TELEMETRY_URL.to_string(),
            connectivity_url: DEFAULT_CONNECTIVITY_URL.to_string(),
            scratch_base: None,
            completion_dirs: completion::default_dirs(),
        }
    }
}

impl InstallOptions {
    /// Canonical path of the installed binary.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join(BINARY_NAME)
    }

    /// Metadata endpoints in query order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        if self.metadata_urls.is_empty() {
            version::default_endpoints(&self.repo)
        } else {
            self.metadata_urls.clone()
        }
    }

    /// Base URL release assets are downloaded from.
    #[must_use]
    pub fn download_base(&self) -> String {
        self.download_base.clone().unwrap_or_else(|| {
            format!("https://github.com/{}/releases/download", self.repo)
        })
    }
}

/// Everything a run talks to.
pub struct Collaborators<'a> {
    /// Process runner.
    pub executor: &'a dyn Executor,
    /// Client for metadata and asset downloads.
    pub http: Arc<dyn HttpClient>,
    /// Short-timeout client for the beacon.
    pub beacon_http: Arc<dyn HttpClient>,
    /// Backoff sleeper.
    pub sleeper: &'a dyn Sleeper,
    /// Progress display.
    pub progress: &'a dyn Progress,
    /// Interrupt flag.
    pub cancel: &'a CancelToken,
    /// Log sink.
    pub log: &'a dyn Log,
}

impl std::fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// Record of a run, appended to by each stage.
#[derive(Debug, Clone)]
pub struct InstallContext {
    options: InstallOptions,
    profile: Option<SystemProfile>,
    version: Option<ReleaseVersion>,
    artifact: Option<FetchedArtifact>,
    located: Option<LocatedBinary>,
    self_check: Option<String>,
    installed: Option<InstalledBinary>,
    layout: Option<ProvisionedLayout>,
    config: Option<ConfigDocument>,
    env_file_written: bool,
    descriptors: Vec<ServiceDescriptor>,
    completion: Option<PathBuf>,
}

impl InstallContext {
    /// Fresh context holding only the options.
    #[must_use]
    pub const fn new(options: InstallOptions) -> Self {
        Self {
            options,
            profile: None,
            version: None,
            artifact: None,
            located: None,
            self_check: None,
            installed: None,
            layout: None,
            config: None,
            env_file_written: false,
            descriptors: Vec::new(),
            completion: None,
        }
    }

    /// Options of the run.
    #[must_use]
    pub const fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Detected platform.
    #[must_use]
    pub const fn profile(&self) -> Option<&SystemProfile> {
        self.profile.as_ref()
    }

    /// Resolved release.
    #[must_use]
    pub const fn version(&self) -> Option<&ReleaseVersion> {
        self.version.as_ref()
    }

    /// Downloaded archive (its path pointed into the scratch directory).
    #[must_use]
    pub const fn artifact(&self) -> Option<&FetchedArtifact> {
        self.artifact.as_ref()
    }

    /// Where the binary was found in the archive.
    #[must_use]
    pub const fn located(&self) -> Option<&LocatedBinary> {
        self.located.as_ref()
    }

    /// First line printed by the binary's self-check.
    #[must_use]
    pub fn self_check(&self) -> Option<&str> {
        self.self_check.as_deref()
    }

    /// Installed binary.
    #[must_use]
    pub const fn installed(&self) -> Option<&InstalledBinary> {
        self.installed.as_ref()
    }

    /// Provisioned application home.
    #[must_use]
    pub const fn layout(&self) -> Option<&ProvisionedLayout> {
        self.layout.as_ref()
    }

    /// Generated configuration document.
    #[must_use]
    pub const fn config(&self) -> Option<&ConfigDocument> {
        self.config.as_ref()
    }

    /// Whether the env file was written by this run.
    #[must_use]
    pub const fn env_file_written(&self) -> bool {
        self.env_file_written
    }

    /// Generated service descriptors.
    #[must_use]
    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    /// Installed completion script.
    #[must_use]
    pub fn completion(&self) -> Option<&Path> {
        self.completion.as_deref()
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// Everything the run produced.
    pub context: InstallContext,
    /// Post-install checks; never affects success.
    pub report: ValidationReport,
}

/// Run the whole pipeline.
///
/// # Errors
///
/// Returns the first fatal [`InstallError`]; [`InstallError::Interrupted`]
/// when the cancel token is set between or during stages.  The scratch
/// directory is removed in every case.
pub fn run(options: InstallOptions, deps: &Collaborators<'_>) -> Result<InstallOutcome, InstallError> {
    let log = deps.log;
    let mut ctx = InstallContext::new(options);
    let installer_version =
        option_env!("TYPEGEN_INSTALLER_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    log.info(&format!("typegen-install {installer_version}"));

    log.stage("Checking prerequisites");
    preflight(&ctx.options, log)?;
    deps.cancel.check()?;

    log.stage("Detecting platform");
    let profile = SystemProfile::detect(ctx.options.arch.as_deref(), deps.executor, log)?;
    log.info(&format!(
        "platform: {} ({})",
        profile.asset_suffix(),
        profile.distro_id.as_deref().unwrap_or("unknown distribution")
    ));
    ctx.profile = Some(profile.clone());
    deps.cancel.check()?;

    log.stage("Resolving version");
    let endpoints = ctx.options.endpoints();
    let version = VersionResolver::new(deps.http.as_ref(), &endpoints, log)
        .resolve(&ctx.options.release)?;
    log.info(&format!("release: {version}"));
    ctx.version = Some(version.clone());
    deps.cancel.check()?;

    let installed = acquire_binary(&mut ctx, deps, &profile, &version)?;
    deps.cancel.check()?;

    let layout = configure(&mut ctx, deps, &installed, &version)?;

    ctx.completion = completion::install_completion(
        &installed.path,
        &ctx.options.completion_dirs,
        deps.executor,
        log,
    );

    if ctx.options.no_telemetry {
        log.debug("telemetry disabled");
    } else {
        let _ = telemetry::send(
            Arc::clone(&deps.beacon_http),
            ctx.options.telemetry_url.clone(),
            &Beacon::new(&version, &profile),
        );
    }

    let report = validate(&ctx, deps, &installed, &layout, &version);
    Ok(InstallOutcome {
        context: ctx,
        report,
    })
}

/// Download, unpack, locate and install the binary.
///
/// Everything transient lives in a scratch directory dropped on return.
fn acquire_binary(
    ctx: &mut InstallContext,
    deps: &Collaborators<'_>,
    profile: &SystemProfile,
    version: &ReleaseVersion,
) -> Result<InstalledBinary, InstallError> {
    let log = deps.log;
    let scratch = Scratch::create(ctx.options.scratch_base.as_deref(), deps.cancel)?;
    log.debug(&format!("scratch directory: {}", scratch.path().display()));

    log.stage("Downloading release");
    let artifact = ArtifactFetcher::new(
        deps.http.as_ref(),
        deps.sleeper,
        deps.cancel,
        deps.progress,
        log,
    )
    .fetch_release(&ctx.options.download_base(), version, profile, scratch.path())?;
    log.info(&format!(
        "downloaded {} ({} bytes{})",
        artifact.asset,
        artifact.bytes,
        if artifact.verified { ", checksum verified" } else { "" }
    ));
    ctx.artifact = Some(artifact.clone());
    deps.cancel.check()?;

    log.stage("Extracting archive");
    let tree = archive::extract(&artifact.path, scratch.path(), deps.cancel, deps.progress, log)?;
    let located =
        BinaryLocator::default().locate(&tree, &Target::new(BINARY_NAME, profile), log)?;
    log.info(&format!(
        "found {} via {} strategy",
        located.path.display(),
        located.strategy
    ));
    ctx.located = Some(located.clone());
    deps.cancel.check()?;

    log.stage("Installing binary");
    let installer = Installer::new(deps.executor, log);
    ctx.self_check = installer.verify(&located.path)?;
    let installed = installer.install(&located.path, &ctx.options.binary_path())?;
    log.info(&format!("installed {}", installed.path.display()));
    ctx.installed = Some(installed.clone());
    Ok(installed)
}

/// Provision the home, then write the configuration and service files.
fn configure(
    ctx: &mut InstallContext,
    deps: &Collaborators<'_>,
    installed: &InstalledBinary,
    version: &ReleaseVersion,
) -> Result<AppLayout, InstallError> {
    let log = deps.log;

    log.stage("Provisioning filesystem");
    let layout = AppLayout::new(&ctx.options.home);
    let provisioner =
        FilesystemProvisioner::new(deps.executor, log, !ctx.options.no_service_user);
    let provisioned = provisioner.provision(&layout)?;
    log.info(&format!(
        "application home {} ({} directories changed)",
        layout.home.display(),
        provisioned.changed.len()
    ));
    let owner = provisioned.owner.clone();
    ctx.layout = Some(provisioned);
    deps.cancel.check()?;

    log.stage("Writing configuration");
    let manager = ConfigManager::new(&layout, &ctx.options.mode, log);
    let document = manager.generate(version, &layout.config_file())?;
    if let Some(backup) = &document.backup_path {
        log.info(&format!("previous configuration saved to {}", backup.display()));
    }
    log.info(&format!("wrote {}", document.path.display()));
    ctx.config = Some(document);
    ctx.env_file_written = manager.write_env_file(version, &layout.env_file())?;
    deps.cancel.check()?;

    log.stage("Generating service descriptors");
    ctx.descriptors = ServiceDescriptorGenerator::new(deps.executor, log, &ctx.options.systemd_dir)
        .generate(&installed.path, &layout, version, owner.as_deref())?;

    if let Some(owner) = owner.as_deref() {
        provisioner.hand_over(&layout, owner);
    }
    deps.cancel.check()?;
    Ok(layout)
}

fn validate(
    ctx: &InstallContext,
    deps: &Collaborators<'_>,
    installed: &InstalledBinary,
    layout: &AppLayout,
    version: &ReleaseVersion,
) -> ValidationReport {
    let log = deps.log;
    log.stage("Validating installation");
    let endpoints = ctx.options.endpoints();
    let report = StandardChecks {
        binary: &installed.path,
        layout,
        version,
        descriptors: &ctx.descriptors,
        executor: deps.executor,
        http: deps.http.as_ref(),
        connectivity_url: &ctx.options.connectivity_url,
        latest_url: endpoints.first().map(String::as_str),
    }
    .suite()
    .run(log);
    if report.all_passed() {
        log.info(&format!("{} validation checks passed", report.ratio()));
    } else {
        log.warn(&format!(
            "{} validation checks passed; the installation may need attention",
            report.ratio()
        ));
    }
    report
}

/// Refuse to start when the binary's directory cannot be written.
fn preflight(options: &InstallOptions, log: &dyn Log) -> Result<(), InstallError> {
    let dir = &options.install_dir;
    if !dir.is_dir() {
        std::fs::create_dir_all(dir).map_err(|e| {
            InstallError::Precondition(format!("cannot create {}: {e}", dir.display()))
        })?;
        log.debug(&format!("created {}", dir.display()));
    }
    tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        InstallError::Precondition(format!(
            "{} is not writable ({e}); re-run as root or set --install-dir",
            dir.display()
        ))
    })?;
    Ok(())
}

/// Scratch directory tracked by the cancel token until it is dropped.
struct Scratch<'a> {
    dir: tempfile::TempDir,
    cancel: &'a CancelToken,
}

impl<'a> Scratch<'a> {
    fn create(base: Option<&Path>, cancel: &'a CancelToken) -> Result<Self, InstallError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("typegen-install-");
        let dir = base.map_or_else(
            || builder.tempdir().context("creating scratch directory"),
            |base| {
                builder
                    .tempdir_in(base)
                    .with_context(|| format!("creating scratch directory in {}", base.display()))
            },
        )?;
        cancel.track_scratch(dir.path());
        Ok(Self { dir, cancel })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        self.cancel.release_scratch();
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::exec::{ExecResult, MockExecutor};
    use crate::test_helpers::{
        FakeHttp, FakeResponse, RecordingLog, RecordingSleeper, noise, write_tar_gz,
    };
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;

    const META: &str = "https://meta.invalid/latest";
    const BASE: &str = "https://dl.invalid";

    struct Host {
        dir: tempfile::TempDir,
    }

    impl Host {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn options(&self) -> InstallOptions {
            let scratch = self.path("scratch");
            std::fs::create_dir_all(&scratch).unwrap();
            std::fs::create_dir_all(self.path("units")).unwrap();
            InstallOptions {
                release: "v1.4.0".to_string(),
                no_telemetry: true,
                install_dir: self.path("bin"),
                home: self.path("home"),
                systemd_dir: self.path("units"),
                no_service_user: true,
                metadata_urls: vec![META.to_string()],
                download_base: Some(BASE.to_string()),
                connectivity_url: "https://connectivity.invalid".to_string(),
                scratch_base: Some(scratch),
                completion_dirs: Vec::new(),
                ..InstallOptions::default()
            }
        }

        fn archive(&self) -> Vec<u8> {
            let path = self.path("release.tar.gz");
            let mut payload = b"#!/bin/sh\necho typegenctl 1.4.0\n".to_vec();
            payload.extend(noise(4096));
            write_tar_gz(&path, &[("typegenctl-1.4.0/bin/typegenctl", &payload, 0o755)]);
            std::fs::read(path).unwrap()
        }
    }

    fn executor() -> MockExecutor {
        let mut mock = MockExecutor::new();
        mock.expect_run_unchecked().returning(|program, args| {
            let stdout = match (program, args) {
                ("uname", ["-s"]) => "Linux",
                ("uname", ["-m"]) => "x86_64",
                ("uname", ["-r"]) => "6.8.0",
                _ => "",
            };
            Ok(ExecResult {
                stdout: stdout.to_string(),
                success: program != "id",
                code: Some(0),
                ..ExecResult::default()
            })
        });
        mock.expect_run_bounded().returning(|_, args, _| {
            Ok(ExecResult {
                stdout: if args == ["--version"] { "typegenctl 1.4.0" } else { "" }.to_string(),
                success: true,
                code: Some(0),
                ..ExecResult::default()
            })
        });
        mock.expect_which().returning(|_| false);
        mock
    }

    fn asset_url() -> String {
        format!("{BASE}/v1.4.0/typegenctl-linux-amd64.tar.gz")
    }

    #[test]
    fn full_run_installs_and_reports() {
        let host = Host::new();
        let executor = executor();
        let http: Arc<FakeHttp> = Arc::new(
            FakeHttp::default()
                .with(&asset_url(), FakeResponse::Body(host.archive()))
                .with(META, FakeResponse::Body(br#"{"tag_name":"v1.4.0"}"#.to_vec()))
                .with("https://connectivity.invalid", FakeResponse::Body(Vec::new())),
        );
        let sleeper = RecordingSleeper::default();
        let cancel = CancelToken::new();
        let log = RecordingLog::default();
        let options = host.options();
        let scratch_base = options.scratch_base.clone().unwrap();

        let outcome = run(
            options,
            &Collaborators {
                executor: &executor,
                http: http.clone(),
                beacon_http: http.clone(),
                sleeper: &sleeper,
                progress: &crate::progress::NoProgress,
                cancel: &cancel,
                log: &log,
            },
        )
        .unwrap();

        let binary = host.path("bin").join("typegenctl");
        assert!(binary.is_file());
        let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        let ctx = &outcome.context;
        assert_eq!(ctx.version().unwrap().as_str(), "1.4.0");
        assert_eq!(ctx.located().unwrap().strategy, "exact-name");
        assert_eq!(ctx.self_check(), Some("typegenctl 1.4.0"));
        assert!(ctx.env_file_written());
        assert_eq!(ctx.descriptors().len(), 1, "no systemctl, compose only");
        assert!(host.path("home/docker-compose.yml").is_file());
        assert!(host.path("home/config/typegen.toml").is_file());
        assert!(http.posts().is_empty(), "telemetry disabled");
        assert_eq!(
            std::fs::read_dir(&scratch_base).unwrap().count(),
            0,
            "scratch directory removed"
        );
        assert_eq!(outcome.report.ratio(), "8/8");
    }

    #[test]
    fn interrupt_mid_download_leaves_no_scratch_files() {
        let host = Host::new();
        let executor = executor();
        let cancel = CancelToken::new();
        let http = Arc::new(FakeHttp::default().with(
            &asset_url(),
            FakeResponse::CancelMidway(vec![0_u8; 2048], cancel.clone()),
        ));
        let sleeper = RecordingSleeper::default();
        let log = RecordingLog::default();
        let options = host.options();
        let scratch_base = options.scratch_base.clone().unwrap();

        let err = run(
            options,
            &Collaborators {
                executor: &executor,
                http: http.clone(),
                beacon_http: http,
                sleeper: &sleeper,
                progress: &crate::progress::NoProgress,
                cancel: &cancel,
                log: &log,
            },
        )
        .unwrap_err();

        assert!(matches!(err, InstallError::Interrupted));
        assert_eq!(err.exit_code(), 130);
        assert_eq!(std::fs::read_dir(&scratch_base).unwrap().count(), 0);
        assert!(!host.path("bin").join("typegenctl").exists());
    }

    #[test]
    fn repeated_interrupt_removes_scratch_before_exit() {
        let host = Host::new();
        let executor = executor();
        let cancel = CancelToken::new();
        let http = Arc::new(FakeHttp::default().with(
            &asset_url(),
            FakeResponse::AbortMidway(vec![0_u8; 2048], cancel.clone()),
        ));
        let sleeper = RecordingSleeper::default();
        let log = RecordingLog::default();
        let options = host.options();
        let scratch_base = options.scratch_base.clone().unwrap();

        let err = run(
            options,
            &Collaborators {
                executor: &executor,
                http: http.clone(),
                beacon_http: http.clone(),
                sleeper: &sleeper,
                progress: &crate::progress::NoProgress,
                cancel: &cancel,
                log: &log,
            },
        )
        .unwrap_err();

        assert!(matches!(err, InstallError::Interrupted));
        let aborts = http.aborts();
        assert_eq!(aborts.len(), 1);
        let (dir, existed_after_abort) = &aborts[0];
        assert!(dir.starts_with(&scratch_base));
        assert!(!existed_after_abort, "abort removes the scratch directory itself");
        assert_eq!(cancel.tracked_scratch(), None);
    }

    #[test]
    fn root_run_hands_written_files_to_service_account() {
        let host = Host::new();
        let config = host.path("home/config/typegen.toml");
        let chowns: Arc<Mutex<Vec<bool>>> = Arc::default();
        let seen = Arc::clone(&chowns);
        let mut executor = MockExecutor::new();
        executor
            .expect_run_unchecked()
            .returning(move |program, args| {
                let stdout = match (program, args) {
                    ("uname", ["-s"]) => "Linux",
                    ("uname", ["-m"]) => "x86_64",
                    ("uname", ["-r"]) => "6.8.0",
                    ("id", ["-u"]) => "0",
                    ("chown", _) => {
                        seen.lock().unwrap().push(config.exists());
                        ""
                    }
                    _ => "",
                };
                Ok(ExecResult {
                    stdout: stdout.to_string(),
                    success: true,
                    code: Some(0),
                    ..ExecResult::default()
                })
            });
        executor
            .expect_run_bounded()
            .returning(|_, _, _| Ok(ExecResult {
                stdout: "typegenctl 1.4.0".to_string(),
                success: true,
                code: Some(0),
                ..ExecResult::default()
            }));
        executor.expect_which().returning(|_| false);
        let http: Arc<FakeHttp> = Arc::new(
            FakeHttp::default()
                .with(&asset_url(), FakeResponse::Body(host.archive()))
                .with("https://connectivity.invalid", FakeResponse::Body(Vec::new())),
        );
        let sleeper = RecordingSleeper::default();
        let cancel = CancelToken::new();
        let log = RecordingLog::default();
        let mut options = host.options();
        options.no_service_user = false;

        let outcome = run(
            options,
            &Collaborators {
                executor: &executor,
                http: http.clone(),
                beacon_http: http,
                sleeper: &sleeper,
                progress: &crate::progress::NoProgress,
                cancel: &cancel,
                log: &log,
            },
        )
        .unwrap();

        assert_eq!(
            outcome.context.layout().unwrap().owner.as_deref(),
            Some(crate::install::layout::SERVICE_USER)
        );
        assert_eq!(
            *chowns.lock().unwrap(),
            vec![false, true],
            "home handed over once provisioned and again once the config exists"
        );
        assert!(!log.warnings().iter().any(|w| w.contains("cannot transfer")));
    }

    #[test]
    fn cancelled_before_start_is_interrupted() {
        let host = Host::new();
        let executor = executor();
        let cancel = CancelToken::new();
        cancel.cancel();
        let http = Arc::new(FakeHttp::default());
        let sleeper = RecordingSleeper::default();
        let log = RecordingLog::default();

        let err = run(
            host.options(),
            &Collaborators {
                executor: &executor,
                http: http.clone(),
                beacon_http: http.clone(),
                sleeper: &sleeper,
                progress: &crate::progress::NoProgress,
                cancel: &cancel,
                log: &log,
            },
        )
        .unwrap_err();

        assert!(matches!(err, InstallError::Interrupted));
        assert!(http.requests().is_empty());
    }

    #[test]
    fn missing_release_fails_before_touching_home() {
        let host = Host::new();
        let executor = executor();
        let cancel = CancelToken::new();
        let http = Arc::new(FakeHttp::default());
        let sleeper = RecordingSleeper::default();
        let log = RecordingLog::default();

        let err = run(
            host.options(),
            &Collaborators {
                executor: &executor,
                http: http.clone(),
                beacon_http: http,
                sleeper: &sleeper,
                progress: &crate::progress::NoProgress,
                cancel: &cancel,
                log: &log,
            },
        )
        .unwrap_err();

        assert!(matches!(err, InstallError::Download { .. }), "{err}");
        assert_eq!(err.exit_code(), 1);
        assert!(!host.path("home").exists());
    }

    #[test]
    fn default_options_follow_repository() {
        let options = InstallOptions {
            repo: "acme/typegen".to_string(),
            ..InstallOptions::default()
        };
        assert_eq!(
            options.download_base(),
            "https://github.com/acme/typegen/releases/download"
        );
        assert_eq!(options.endpoints().len(), 2);
        assert!(options.endpoints()[0].contains("acme/typegen"));
        assert_eq!(options.binary_path(), PathBuf::from("/usr/local/bin/typegenctl"));
    }
}
