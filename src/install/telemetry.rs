//! Anonymous install beacon.
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;

use super::version::ReleaseVersion;
use crate::http::HttpClient;
use crate::platform::SystemProfile;

/// Environment variables that disable the beacon when set to anything but
/// an empty string, `0` or `false`.
pub const OPT_OUT_VARS: &[&str] = &["TYPEGEN_NO_TELEMETRY", "DO_NOT_TRACK"];

/// Payload posted to the beacon endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Beacon {
    /// Installed release.
    pub version: String,
    /// Operating system.
    pub os: String,
    /// Architecture.
    pub arch: String,
    /// Distribution id, when known.
    pub distro: Option<String>,
    /// Installer build.
    pub installer: &'static str,
}

impl Beacon {
    /// Beacon describing this run.
    #[must_use]
    pub fn new(version: &ReleaseVersion, profile: &SystemProfile) -> Self {
        Self {
            version: version.as_str().to_string(),
            os: profile.os.to_string(),
            arch: profile.arch.to_string(),
            distro: profile.distro_id.clone(),
            installer: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Whether any of [`OPT_OUT_VARS`] is set, reading through `get`.
pub fn opted_out_by_env(get: impl Fn(&str) -> Option<String>) -> bool {
    OPT_OUT_VARS.iter().any(|var| {
        get(var).is_some_and(|v| {
            let v = v.trim();
            !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
        })
    })
}

/// Post `beacon` to `url` on a detached thread.
///
/// Failures are logged at debug level and otherwise ignored.  The handle is
/// returned so callers may wait; the pipeline drops it.
#[must_use]
pub fn send(http: Arc<dyn HttpClient>, url: String, beacon: &Beacon) -> Option<JoinHandle<()>> {
    let body = match serde_json::to_string(beacon) {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("telemetry payload not serializable: {e}");
            return None;
        }
    };
    std::thread::Builder::new()
        .name("telemetry".to_string())
        .spawn(move || match http.post_json(&url, &body) {
            Ok(()) => tracing::debug!("telemetry sent to {url}"),
            Err(e) => tracing::debug!("telemetry to {url} failed: {e}"),
        })
        .ok()
}
