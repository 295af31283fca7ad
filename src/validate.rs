//! Post-install validation.
//!
//! Checks are informational: a failing check is recorded and reported but
//! never changes the outcome of the run.
use std::path::Path;

use crate::exec::Executor;
use crate::http::HttpClient;
use crate::install::binary::{INTROSPECTION_FLAGS, SELF_CHECK_TIMEOUT};
use crate::install::layout::AppLayout;
use crate::install::services::ServiceDescriptor;
use crate::install::version::{ReleaseVersion, parse_tag};
use crate::logging::{CheckStatus, Log};

/// A single post-install predicate.
pub trait Check {
    /// Name shown in the summary.
    fn name(&self) -> &str;

    /// Name of a check that must pass before this one runs.
    fn requires(&self) -> Option<&str> {
        None
    }

    /// Evaluate the predicate.
    ///
    /// # Errors
    ///
    /// An error is recorded as a failure with its message.
    fn run(&self) -> anyhow::Result<bool>;
}

/// [`Check`] backed by a closure.
pub struct FnCheck<'a> {
    name: String,
    requires: Option<String>,
    predicate: Box<dyn Fn() -> anyhow::Result<bool> + 'a>,
}

impl std::fmt::Debug for FnCheck<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCheck")
            .field("name", &self.name)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

impl<'a> FnCheck<'a> {
    /// Check named `name` evaluating `predicate`.
    pub fn new(name: &str, predicate: impl Fn() -> anyhow::Result<bool> + 'a) -> Self {
        Self {
            name: name.to_string(),
            requires: None,
            predicate: Box::new(predicate),
        }
    }

    /// Only run when the check named `dependency` passed.
    #[must_use]
    pub fn requiring(mut self, dependency: &str) -> Self {
        self.requires = Some(dependency.to_string());
        self
    }
}

impl Check for FnCheck<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Option<&str> {
        self.requires.as_deref()
    }

    fn run(&self) -> anyhow::Result<bool> {
        (self.predicate)()
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Check name.
    pub name: String,
    /// Final status.
    pub status: CheckStatus,
    /// Failure or skip detail.
    pub message: Option<String>,
}

/// Aggregate of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Checks that passed.
    pub passed: usize,
    /// Checks that ran (skipped checks are excluded).
    pub total: usize,
    /// Checks skipped because a prerequisite did not pass.
    pub skipped: usize,
    /// Per-check results in run order.
    pub outcomes: Vec<CheckOutcome>,
}

impl ValidationReport {
    /// `passed/total`, e.g. `3/5`.
    #[must_use]
    pub fn ratio(&self) -> String {
        format!("{}/{}", self.passed, self.total)
    }

    /// Whether every check that ran passed.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Ordered list of checks.
#[derive(Default)]
pub struct ValidationSuite<'a> {
    checks: Vec<Box<dyn Check + 'a>>,
}

impl std::fmt::Debug for ValidationSuite<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationSuite")
            .field("checks", &self.names())
            .finish()
    }
}

impl<'a> ValidationSuite<'a> {
    /// Empty suite.
    #[must_use]
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Append a check.
    #[must_use]
    pub fn with(mut self, check: impl Check + 'a) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    /// Check names in run order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.name().to_string()).collect()
    }

    /// Run every check in order and record each result through `log`.
    pub fn run(&self, log: &dyn Log) -> ValidationReport {
        let mut report = ValidationReport::default();

        for check in &self.checks {
            let name = check.name().to_string();
            let blocked = check.requires().filter(|dep| {
                !report
                    .outcomes
                    .iter()
                    .any(|o| o.name == *dep && o.status == CheckStatus::Passed)
            });

            let (status, message) = blocked.map_or_else(
                || match check.run() {
                    Ok(true) => (CheckStatus::Passed, None),
                    Ok(false) => (CheckStatus::Failed, None),
                    Err(e) => (CheckStatus::Failed, Some(format!("{e:#}"))),
                },
                |dep| (CheckStatus::Skipped, Some(format!("requires {dep}"))),
            );

            match status {
                CheckStatus::Passed => {
                    report.passed += 1;
                    report.total += 1;
                }
                CheckStatus::Failed => report.total += 1,
                CheckStatus::Skipped => report.skipped += 1,
            }
            log.debug(&format!("check '{name}': {status:?}"));
            log.record_check(&name, status, message.as_deref());
            report.outcomes.push(CheckOutcome {
                name,
                status,
                message,
            });
        }
        report
    }
}

/// Inputs of the standard post-install battery.
pub struct StandardChecks<'a> {
    /// Installed binary.
    pub binary: &'a Path,
    /// Application home.
    pub layout: &'a AppLayout,
    /// Version the configuration should carry.
    pub version: &'a ReleaseVersion,
    /// Descriptors written by the run.
    pub descriptors: &'a [ServiceDescriptor],
    /// Process runner.
    pub executor: &'a dyn Executor,
    /// HTTP client.
    pub http: &'a dyn HttpClient,
    /// URL requested for general connectivity.
    pub connectivity_url: &'a str,
    /// Metadata endpoint queried for the latest release.
    pub latest_url: Option<&'a str>,
}

impl std::fmt::Debug for StandardChecks<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardChecks")
            .field("binary", &self.binary)
            .field("layout", &self.layout)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Names of the standard battery, in run order.
pub const STANDARD_CHECK_NAMES: &[&str] = &[
    "binary installed",
    "binary executable",
    "home layout",
    "config version",
    "env file present",
    "service descriptor present",
    "network reachable",
    "latest version reachable",
];

impl<'a> StandardChecks<'a> {
    /// Build the standard suite.
    #[must_use]
    pub fn suite(&self) -> ValidationSuite<'a> {
        let binary = self.binary;
        let layout = self.layout;
        let version = self.version;
        let descriptors = self.descriptors;
        let executor = self.executor;
        let http = self.http;
        let connectivity_url = self.connectivity_url;
        let latest_url = self.latest_url;

        ValidationSuite::new()
            .with(FnCheck::new("binary installed", move || Ok(binary.is_file())))
            .with(
                FnCheck::new("binary executable", move || {
                    let program = binary.to_string_lossy();
                    Ok(INTROSPECTION_FLAGS.iter().any(|&flag| {
                        executor
                            .run_bounded(&program, &[flag], SELF_CHECK_TIMEOUT)
                            .is_ok_and(|r| r.success)
                    }))
                })
                .requiring("binary installed"),
            )
            .with(FnCheck::new("home layout", move || {
                Ok(layout
                    .directories(false)
                    .iter()
                    .all(|(path, _)| path.is_dir()))
            }))
            .with(FnCheck::new("config version", move || {
                config_has_version(&layout.config_file(), version)
            }))
            .with(FnCheck::new("env file present", move || {
                Ok(layout.env_file().is_file())
            }))
            .with(FnCheck::new("service descriptor present", move || {
                Ok(descriptors.iter().any(|d| d.file().path.is_file()))
            }))
            .with(FnCheck::new("network reachable", move || {
                http.check_reachable(connectivity_url)?;
                Ok(true)
            }))
            .with(
                FnCheck::new("latest version reachable", move || {
                    let Some(url) = latest_url else {
                        anyhow::bail!("no metadata endpoint configured");
                    };
                    Ok(parse_tag(&http.get_text(url)?).is_some())
                })
                .requiring("network reachable"),
            )
    }
}

fn config_has_version(path: &Path, version: &ReleaseVersion) -> anyhow::Result<bool> {
    use anyhow::Context as _;
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let table: toml::Table = text.parse().context("parsing configuration")?;
    Ok(table.get("version").and_then(toml::Value::as_str) == Some(version.as_str()))
}
