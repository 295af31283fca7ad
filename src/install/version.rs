//! Release version resolution.
use std::fmt;

use crate::error::InstallError;
use crate::http::HttpClient;
use crate::logging::Log;

/// Sentinel meaning "ask the metadata endpoints".
pub const LATEST: &str = "latest";

/// A normalized release version with no leading `v`.
///
/// Constructed once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseVersion(String);

impl ReleaseVersion {
    /// Normalize a raw tag: trim whitespace and strip one leading `v`.
    ///
    /// Returns `None` if nothing is left.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed).trim();
        (!bare.is_empty()).then(|| Self(bare.to_string()))
    }

    /// The version without prefix, e.g. `2.3.0`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The release tag, e.g. `v2.3.0`.
    #[must_use]
    pub fn tag(&self) -> String {
        format!("v{}", self.0)
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Default ordered metadata endpoints for `repo` (`owner/name`).
#[must_use]
pub fn default_endpoints(repo: &str) -> Vec<String> {
    vec![
        format!("https://api.github.com/repos/{repo}/releases/latest"),
        format!("https://github.com/{repo}/releases/latest/download/latest.json"),
    ]
}

/// Extract the version tag from a release metadata document.
///
/// Accepts GitHub's `tag_name` and the mirror's `version` field.
#[must_use]
pub fn parse_tag(json: &str) -> Option<String> {
    let doc: serde_json::Value = serde_json::from_str(json).ok()?;
    ["tag_name", "version"]
        .iter()
        .filter_map(|key| doc.get(key).and_then(serde_json::Value::as_str))
        .map(str::trim)
        .find(|tag| !tag.is_empty())
        .map(str::to_string)
}

/// Resolves the requested version against an ordered list of endpoints.
pub struct VersionResolver<'a> {
    http: &'a dyn HttpClient,
    endpoints: &'a [String],
    log: &'a dyn Log,
}

impl fmt::Debug for VersionResolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionResolver")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl<'a> VersionResolver<'a> {
    /// Create a resolver that tries `endpoints` in order.
    #[must_use]
    pub const fn new(http: &'a dyn HttpClient, endpoints: &'a [String], log: &'a dyn Log) -> Self {
        Self {
            http,
            endpoints,
            log,
        }
    }

    /// Resolve `requested` into a concrete version.
    ///
    /// A pinned value is normalized without any network access.  `latest`
    /// (or an empty value) queries the endpoints in order and returns the
    /// first non-empty tag.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::VersionResolution`] when a pinned value is
    /// empty after normalization or when every endpoint fails.
    pub fn resolve(&self, requested: &str) -> Result<ReleaseVersion, InstallError> {
        let requested = requested.trim();
        if !requested.is_empty() && !requested.eq_ignore_ascii_case(LATEST) {
            return ReleaseVersion::parse(requested).ok_or_else(|| {
                InstallError::VersionResolution(format!("invalid version '{requested}'"))
            });
        }

        let mut failures = Vec::new();
        for endpoint in self.endpoints {
            match self.http.get_text(endpoint) {
                Ok(body) => {
                    if let Some(version) = parse_tag(&body).as_deref().and_then(ReleaseVersion::parse)
                    {
                        self.log
                            .debug(&format!("resolved {version} from {endpoint}"));
                        return Ok(version);
                    }
                    self.log.debug(&format!("{endpoint}: no version tag in response"));
                    failures.push(format!("{endpoint}: no version tag"));
                }
                Err(e) => {
                    self.log.debug(&format!("{endpoint}: {e}"));
                    failures.push(format!("{endpoint}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            return Err(InstallError::VersionResolution(
                "no metadata endpoints configured".to_string(),
            ));
        }
        Err(InstallError::VersionResolution(failures.join("; ")))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeHttp, FakeResponse, RecordingLog};

    fn endpoints() -> Vec<String> {
        vec![
            "https://a.invalid/latest".to_string(),
            "https://b.invalid/latest".to_string(),
        ]
    }

    #[test]
    fn pinned_version_strips_leading_v() {
        let http = FakeHttp::default();
        let log = RecordingLog::default();
        let eps = endpoints();
        let resolver = VersionResolver::new(&http, &eps, &log);
        assert_eq!(resolver.resolve("v1.4.2").unwrap().as_str(), "1.4.2");
        assert_eq!(resolver.resolve("1.4.2").unwrap().as_str(), "1.4.2");
        assert!(http.requests().is_empty(), "pinned versions never hit the network");
    }

    #[test]
    fn falls_through_to_second_endpoint() {
        let http = FakeHttp::default()
            .with("https://a.invalid/latest", FakeResponse::Status(503))
            .with(
                "https://b.invalid/latest",
                FakeResponse::Body(br#"{"tag_name":"v2.3.0"}"#.to_vec()),
            );
        let log = RecordingLog::default();
        let eps = endpoints();
        let version = VersionResolver::new(&http, &eps, &log)
            .resolve(LATEST)
            .unwrap();
        assert_eq!(version.as_str(), "2.3.0");
        assert_eq!(version.tag(), "v2.3.0");
    }

    #[test]
    fn empty_tag_counts_as_failure() {
        let http = FakeHttp::default()
            .with(
                "https://a.invalid/latest",
                FakeResponse::Body(br#"{"tag_name":""}"#.to_vec()),
            )
            .with(
                "https://b.invalid/latest",
                FakeResponse::Body(br#"{"version":"3.0.1"}"#.to_vec()),
            );
        let log = RecordingLog::default();
        let eps = endpoints();
        let version = VersionResolver::new(&http, &eps, &log)
            .resolve("")
            .unwrap();
        assert_eq!(version.as_str(), "3.0.1");
    }

    #[test]
    fn first_success_short_circuits() {
        let http = FakeHttp::default()
            .with(
                "https://a.invalid/latest",
                FakeResponse::Body(br#"{"tag_name":"v1.0.0"}"#.to_vec()),
            )
            .with(
                "https://b.invalid/latest",
                FakeResponse::Body(br#"{"tag_name":"v9.9.9"}"#.to_vec()),
            );
        let log = RecordingLog::default();
        let eps = endpoints();
        let version = VersionResolver::new(&http, &eps, &log)
            .resolve("Latest")
            .unwrap();
        assert_eq!(version.as_str(), "1.0.0");
        assert_eq!(http.requests(), vec!["https://a.invalid/latest".to_string()]);
    }

    #[test]
    fn all_endpoints_failing_is_fatal() {
        let http = FakeHttp::default()
            .with("https://a.invalid/latest", FakeResponse::Transport)
            .with(
                "https://b.invalid/latest",
                FakeResponse::Body(b"<html>rate limited</html>".to_vec()),
            );
        let log = RecordingLog::default();
        let eps = endpoints();
        let err = VersionResolver::new(&http, &eps, &log)
            .resolve(LATEST)
            .unwrap_err();
        assert!(matches!(err, InstallError::VersionResolution(_)));
        assert!(err.to_string().contains("b.invalid"));
    }

    #[test]
    fn parse_tag_handles_missing_and_null() {
        assert_eq!(parse_tag(r#"{"id":1}"#), None);
        assert_eq!(parse_tag(r#"{"tag_name":null}"#), None);
        assert_eq!(parse_tag("not json"), None);
        assert_eq!(
            parse_tag("{\n  \"tag_name\": \"v0.2.0\",\n  \"draft\": false\n}"),
            Some("v0.2.0".to_string())
        );
    }

    #[test]
    fn bare_v_is_not_a_version() {
        assert_eq!(ReleaseVersion::parse("v"), None);
        assert_eq!(ReleaseVersion::parse("  "), None);
    }

    #[test]
    fn default_endpoints_are_ordered() {
        let eps = default_endpoints("typegen-dev/typegen");
        assert_eq!(eps.len(), 2);
        assert!(eps[0].contains("api.github.com/repos/typegen-dev/typegen"));
        assert!(eps[1].ends_with("latest.json"));
    }
}
