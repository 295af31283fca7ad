//! Release artifact download with bounded retries and integrity checks.
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;

use super::BINARY_NAME;
use super::version::ReleaseVersion;
use crate::cancel::CancelToken;
use crate::error::InstallError;
use crate::http::{HttpClient, HttpError};
use crate::logging::Log;
use crate::platform::SystemProfile;
use crate::progress::Progress;

/// Smallest artifact accepted as a plausible release archive.
pub const MIN_ARTIFACT_BYTES: u64 = 1024;

/// Checksums file published next to every release asset.
pub const CHECKSUMS_FILE: &str = "checksums.sha256";

/// Granularity at which [`ThreadSleeper`] re-checks cancellation.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Attempt budget and backoff for a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }
}

/// Waits between attempts.
pub trait Sleeper: Send + Sync {
    /// Sleep for `delay`, returning early with
    /// [`InstallError::Interrupted`] if `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Interrupted`] on cancellation.
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> Result<(), InstallError>;
}

/// [`Sleeper`] that blocks the current thread in short slices.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> Result<(), InstallError> {
        let mut remaining = delay;
        while !remaining.is_zero() {
            cancel.check()?;
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        cancel.check()
    }
}

/// One attempt, as written to the debug log.
struct DownloadAttempt<'a> {
    url: &'a str,
    destination: &'a Path,
    attempt: u32,
    delay_before_next: Option<Duration>,
}

impl fmt::Display for DownloadAttempt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt {} of {} into {}",
            self.attempt,
            self.url,
            self.destination.display()
        )?;
        if let Some(delay) = self.delay_before_next {
            write!(f, " (next in {}s)", delay.as_secs())?;
        }
        Ok(())
    }
}

/// Why the retry loop gave up.
enum AttemptError {
    /// The server reported the asset does not exist; retrying cannot help.
    Missing(InstallError),
    Failed(InstallError),
}

impl From<AttemptError> for InstallError {
    fn from(e: AttemptError) -> Self {
        match e {
            AttemptError::Missing(e) | AttemptError::Failed(e) => e,
        }
    }
}

/// A downloaded release archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    /// Local path of the archive.
    pub path: PathBuf,
    /// Asset name that was downloaded.
    pub asset: String,
    /// Size in bytes.
    pub bytes: u64,
    /// Whether a published checksum was verified.
    pub verified: bool,
}

/// Downloads release artifacts.
pub struct ArtifactFetcher<'a> {
    http: &'a dyn HttpClient,
    sleeper: &'a dyn Sleeper,
    cancel: &'a CancelToken,
    progress: &'a dyn Progress,
    log: &'a dyn Log,
    policy: RetryPolicy,
}

impl fmt::Debug for ArtifactFetcher<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactFetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a> ArtifactFetcher<'a> {
    /// Create a fetcher using the default [`RetryPolicy`].
    #[must_use]
    pub fn new(
        http: &'a dyn HttpClient,
        sleeper: &'a dyn Sleeper,
        cancel: &'a CancelToken,
        progress: &'a dyn Progress,
        log: &'a dyn Log,
    ) -> Self {
        Self {
            http,
            sleeper,
            cancel,
            progress,
            log,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Download `url` into `destination`, returning the byte count.
    ///
    /// # Errors
    ///
    /// - [`InstallError::Download`] once every attempt has failed; no file
    ///   is left at `destination`.
    /// - [`InstallError::CorruptArtifact`] when the transfer succeeded but
    ///   produced fewer than [`MIN_ARTIFACT_BYTES`].
    /// - [`InstallError::Interrupted`] on cancellation.
    pub fn fetch(&self, url: &str, destination: &Path) -> Result<u64, InstallError> {
        Ok(self.fetch_attempts(url, destination)?)
    }

    fn fetch_attempts(&self, url: &str, destination: &Path) -> Result<u64, AttemptError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))
                .map_err(|e| AttemptError::Failed(e.into()))?;
        }

        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if let Err(e) = self.cancel.check() {
                remove_partial(destination);
                return Err(AttemptError::Failed(e));
            }

            match self.download_once(url, destination) {
                Ok(bytes) => {
                    let done = DownloadAttempt {
                        url,
                        destination,
                        attempt,
                        delay_before_next: None,
                    };
                    self.log.debug(&format!("{done}: {bytes} bytes"));
                    return check_size(destination, bytes).map_err(AttemptError::Failed);
                }
                Err(HttpError::Interrupted) => {
                    remove_partial(destination);
                    return Err(AttemptError::Failed(InstallError::Interrupted));
                }
                Err(e) => {
                    remove_partial(destination);
                    last_error = e.to_string();
                    if matches!(e, HttpError::Status(404)) {
                        return Err(AttemptError::Missing(InstallError::Download {
                            url: url.to_string(),
                            attempts: attempt,
                            reason: last_error,
                        }));
                    }

                    let delay = (attempt < attempts).then(|| self.policy.delay_after(attempt));
                    let failed = DownloadAttempt {
                        url,
                        destination,
                        attempt,
                        delay_before_next: delay,
                    };
                    self.log.debug(&format!("{failed}: {last_error}"));
                    if let Some(delay) = delay {
                        self.log.warn(&format!(
                            "download attempt {attempt}/{attempts} failed ({last_error}); retrying in {}s",
                            delay.as_secs()
                        ));
                        self.sleeper
                            .sleep(delay, self.cancel)
                            .map_err(AttemptError::Failed)?;
                    }
                }
            }
        }

        remove_partial(destination);
        Err(AttemptError::Failed(InstallError::Download {
            url: url.to_string(),
            attempts,
            reason: last_error,
        }))
    }

    fn download_once(&self, url: &str, destination: &Path) -> Result<u64, HttpError> {
        let mut out = BufWriter::new(File::create(destination)?);
        let bytes = self.http.download(url, &mut out, self.cancel, self.progress)?;
        out.flush()?;
        Ok(bytes)
    }

    /// Download the release archive for `profile` into `scratch`.
    ///
    /// Tries the platform-suffixed asset first and falls back to the legacy
    /// unsuffixed name when the server reports it missing.  The published
    /// checksum is verified when available.
    ///
    /// # Errors
    ///
    /// As [`ArtifactFetcher::fetch`], plus [`InstallError::CorruptArtifact`]
    /// on a checksum mismatch.
    pub fn fetch_release(
        &self,
        download_base: &str,
        version: &ReleaseVersion,
        profile: &SystemProfile,
        scratch: &Path,
    ) -> Result<FetchedArtifact, InstallError> {
        let base = download_base.trim_end_matches('/');
        let tag = version.tag();
        let suffixed = asset_name(profile);
        let legacy = legacy_asset_name();

        let mut result = Err(InstallError::Precondition("no asset candidates".to_string()));
        for asset in [suffixed.as_str(), legacy.as_str()] {
            let url = format!("{base}/{tag}/{asset}");
            let destination = scratch.join(asset);
            match self.fetch_attempts(&url, &destination) {
                Ok(bytes) => {
                    let checksums_url = format!("{base}/{tag}/{CHECKSUMS_FILE}");
                    let verified = self.verify_checksum(&checksums_url, asset, &destination)?;
                    return Ok(FetchedArtifact {
                        path: destination,
                        asset: asset.to_string(),
                        bytes,
                        verified,
                    });
                }
                Err(AttemptError::Missing(e)) => {
                    if asset == suffixed {
                        self.log.warn(&format!(
                            "{suffixed} not published for {tag}; trying legacy asset name"
                        ));
                    }
                    result = Err(e);
                }
                Err(AttemptError::Failed(e)) => return Err(e),
            }
        }
        result
    }

    /// Verify `artifact` against the checksums file at `checksums_url`.
    ///
    /// Returns `Ok(false)` (with a warning) when the checksums file is
    /// unavailable or has no entry for `asset`.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::CorruptArtifact`] on a digest mismatch; the
    /// artifact is deleted first.
    pub fn verify_checksum(
        &self,
        checksums_url: &str,
        asset: &str,
        artifact: &Path,
    ) -> Result<bool, InstallError> {
        let checksums = match self.http.get_text(checksums_url) {
            Ok(text) => text,
            Err(e) => {
                self.log.warn(&format!(
                    "could not download {CHECKSUMS_FILE} ({e}); skipping verification"
                ));
                return Ok(false);
            }
        };

        let Some(expected) = expected_digest(&checksums, asset) else {
            self.log
                .warn(&format!("{CHECKSUMS_FILE} has no entry for {asset}; skipping verification"));
            return Ok(false);
        };

        let actual = compute_sha256(artifact)?;
        if !expected.eq_ignore_ascii_case(&actual) {
            remove_partial(artifact);
            return Err(InstallError::CorruptArtifact {
                path: artifact.display().to_string(),
                reason: format!("checksum mismatch: expected {expected}, got {actual}"),
            });
        }
        self.log.debug(&format!("checksum verified for {asset}"));
        Ok(true)
    }
}

/// Platform-suffixed archive name, e.g. `typegenctl-linux-amd64.tar.gz`.
#[must_use]
pub fn asset_name(profile: &SystemProfile) -> String {
    format!("{BINARY_NAME}-{}.tar.gz", profile.asset_suffix())
}

/// Archive name used by releases that predate per-platform assets.
#[must_use]
pub fn legacy_asset_name() -> String {
    format!("{BINARY_NAME}.tar.gz")
}

/// Find the digest for `asset` in `sha256sum`-formatted text.
fn expected_digest(checksums: &str, asset: &str) -> Option<String> {
    checksums.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let digest = fields.next()?;
        let name = fields.next()?.trim_start_matches('*');
        (name == asset && !digest.is_empty()).then(|| digest.to_string())
    })
}

/// Compute the lowercase hex SHA-256 digest of the file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_sha256(path: &Path) -> anyhow::Result<String> {
    use fmt::Write as _;
    use sha2::{Digest, Sha256};

    let mut file = File::open(path)
        .with_context(|| format!("reading {} for checksum verification", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).context("hashing artifact")?;
    let result = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for b in &result {
        write!(hex, "{b:02x}").unwrap_or(());
    }
    Ok(hex)
}

fn check_size(destination: &Path, bytes: u64) -> Result<u64, InstallError> {
    let on_disk = fs::metadata(destination).map_or(bytes, |m| m.len());
    if on_disk < MIN_ARTIFACT_BYTES {
        remove_partial(destination);
        return Err(InstallError::CorruptArtifact {
            path: destination.display().to_string(),
            reason: format!("{on_disk} bytes is below the {MIN_ARTIFACT_BYTES} byte minimum"),
        });
    }
    Ok(on_disk)
}

fn remove_partial(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}
