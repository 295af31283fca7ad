//! Command-line arguments and their environment fallbacks.
use std::path::PathBuf;

use clap::Parser;
use clap::builder::FalseyValueParser;

use crate::install::DEFAULT_REPO;
use crate::install::completion;
use crate::install::telemetry;
use crate::install::version::LATEST;
use crate::pipeline::{
    DEFAULT_HOME, DEFAULT_INSTALL_DIR, DEFAULT_MODE, DEFAULT_CONNECTIVITY_URL, DEFAULT_SYSTEMD_DIR,
    DEFAULT_TELEMETRY_URL, InstallOptions,
};

/// Command-line interface of the installer.
///
/// Every option can also be set through the environment variable named in
/// its help text; a flag on the command line wins.
#[derive(Parser, Debug)]
#[command(
    name = "typegen-install",
    about = "Install the typegenctl binary, its configuration and service files",
    version = option_env!("TYPEGEN_INSTALLER_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
)]
pub struct Cli {
    /// Release to install (`latest` or a version such as 1.4.0)
    #[arg(long, env = "TYPEGEN_VERSION", default_value = LATEST)]
    pub release: String,

    /// Override the detected architecture (amd64, arm64, armv7 or an alias)
    #[arg(long, env = "TYPEGEN_ARCH")]
    pub arch: Option<String>,

    /// Enable verbose output
    #[arg(short, long, env = "TYPEGEN_DEBUG", value_parser = FalseyValueParser::new())]
    pub verbose: bool,

    /// Do not send the anonymous install beacon
    #[arg(long, env = "TYPEGEN_NO_TELEMETRY", value_parser = FalseyValueParser::new())]
    pub no_telemetry: bool,

    /// Release repository as owner/name
    #[arg(long, env = "TYPEGEN_REPO", default_value = DEFAULT_REPO)]
    pub repo: String,

    /// Directory receiving the typegenctl binary
    #[arg(long, env = "TYPEGEN_INSTALL_DIR", default_value = DEFAULT_INSTALL_DIR)]
    pub install_dir: PathBuf,

    /// Application home directory
    #[arg(long, env = "TYPEGEN_HOME", default_value = DEFAULT_HOME)]
    pub home: PathBuf,

    /// Deployment mode written into the configuration
    #[arg(long, env = "TYPEGEN_MODE", default_value = DEFAULT_MODE)]
    pub mode: String,

    /// Directory receiving the systemd unit
    #[arg(long, env = "TYPEGEN_SYSTEMD_DIR", default_value = DEFAULT_SYSTEMD_DIR)]
    pub systemd_dir: PathBuf,

    /// Do not create the service account or change ownership
    #[arg(long, env = "TYPEGEN_NO_SERVICE_USER", value_parser = FalseyValueParser::new())]
    pub no_service_user: bool,

    /// Release metadata endpoint, queried in order (repeatable, comma separated)
    #[arg(long = "metadata-url", env = "TYPEGEN_METADATA_URLS", value_delimiter = ',')]
    pub metadata_urls: Vec<String>,

    /// Base URL of release assets [default: the repository's release downloads]
    #[arg(long, env = "TYPEGEN_DOWNLOAD_URL")]
    pub download_base: Option<String>,

    /// Install beacon endpoint
    #[arg(long, env = "TYPEGEN_TELEMETRY_URL", default_value = DEFAULT_TELEMETRY_URL)]
    pub telemetry_url: String,
}

impl Cli {
    /// Convert into run options, honouring `DO_NOT_TRACK` from the process
    /// environment.
    #[must_use]
    pub fn into_options(self) -> InstallOptions {
        self.into_options_with(|var| std::env::var(var).ok())
    }

    /// Convert into run options, reading opt-out variables through `env`.
    #[must_use]
    pub fn into_options_with(self, env: impl Fn(&str) -> Option<String>) -> InstallOptions {
        let no_telemetry = self.no_telemetry || telemetry::opted_out_by_env(env);
        InstallOptions {
            release: self.release,
            arch: self.arch.filter(|a| !a.trim().is_empty()),
            verbose: self.verbose,
            no_telemetry,
            repo: self.repo,
            install_dir: self.install_dir,
            home: self.home,
            mode: self.mode,
            systemd_dir: self.systemd_dir,
            no_service_user: self.no_service_user,
            metadata_urls: self
                .metadata_urls
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            download_base: self.download_base.filter(|u| !u.trim().is_empty()),
            telemetry_url: self.telemetry_url,
            connectivity_url: DEFAULT_CONNECTIVITY_URL.to_string(),
            scratch_base: None,
            completion_dirs: completion::default_dirs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> InstallOptions {
        let mut argv = vec!["typegen-install"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).into_options_with(|_| None)
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let options = parse(&[
            "--release",
            "v1.4.0",
            "--arch",
            "aarch64",
            "--home",
            "/srv/typegen",
            "--install-dir",
            "/opt/bin",
            "--mode",
            "development",
            "--no-service-user",
        ]);
        assert_eq!(options.release, "v1.4.0");
        assert_eq!(options.arch.as_deref(), Some("aarch64"));
        assert_eq!(options.home, PathBuf::from("/srv/typegen"));
        assert_eq!(options.binary_path(), PathBuf::from("/opt/bin/typegenctl"));
        assert_eq!(options.mode, "development");
        assert!(options.no_service_user);
    }

    #[test]
    fn metadata_urls_are_comma_separated() {
        let options = parse(&["--metadata-url", "https://a.invalid, https://b.invalid"]);
        assert_eq!(
            options.metadata_urls,
            vec!["https://a.invalid", "https://b.invalid"]
        );
        assert_eq!(options.endpoints(), options.metadata_urls);
    }

    #[test]
    fn parse_verbose() {
        assert!(parse(&["-v"]).verbose);
        assert!(parse(&["--verbose"]).verbose);
    }

    #[test]
    fn do_not_track_disables_telemetry() {
        let cli = Cli::parse_from(["typegen-install"]);
        let options =
            cli.into_options_with(|var| (var == "DO_NOT_TRACK").then(|| "1".to_string()));
        assert!(options.no_telemetry);
    }

    #[test]
    fn no_telemetry_flag() {
        assert!(parse(&["--no-telemetry"]).no_telemetry);
    }

    #[test]
    fn empty_arch_means_detect() {
        assert_eq!(parse(&["--arch", " "]).arch, None);
    }
}
