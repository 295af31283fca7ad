//! Host detection and normalization into a [`SystemProfile`].
use std::fmt;

use crate::error::InstallError;
use crate::exec::Executor;
use crate::logging::Log;

/// Supported operating systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    /// Linux (any distribution).
    Linux,
    /// macOS.
    Darwin,
}

impl Os {
    /// Map a raw OS identifier (`uname -s` or `std::env::consts::OS`).
    #[must_use]
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "darwin" | "macos" => Some(Self::Darwin),
            _ => None,
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Darwin => write!(f, "darwin"),
        }
    }
}

/// Normalized CPU architecture used in release asset names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// 64-bit x86.
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// 32-bit `ARMv7` hard-float.
    Armv7,
}

/// Raw architecture aliases and the architecture each one maps to.
pub const ARCH_ALIASES: &[(&str, Arch)] = &[
    ("x86_64", Arch::Amd64),
    ("x64", Arch::Amd64),
    ("amd64", Arch::Amd64),
    ("aarch64", Arch::Arm64),
    ("arm64", Arch::Arm64),
    ("armv7l", Arch::Armv7),
    ("armv7", Arch::Armv7),
    ("armhf", Arch::Armv7),
];

impl Arch {
    /// Map a raw architecture string through [`ARCH_ALIASES`].
    #[must_use]
    pub fn from_raw(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        ARCH_ALIASES
            .iter()
            .find(|(alias, _)| *alias == raw)
            .map(|(_, arch)| *arch)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amd64 => write!(f, "amd64"),
            Self::Arm64 => write!(f, "arm64"),
            Self::Armv7 => write!(f, "armv7"),
        }
    }
}

/// Raw identifiers read from the host before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawHost {
    /// OS identifier, e.g. `linux`.
    pub os: String,
    /// Machine hardware name, e.g. `x86_64`.
    pub arch: String,
    /// Kernel release, e.g. `6.8.0-45-generic`.
    pub kernel: String,
    /// Contents of `/etc/os-release`, when present.
    pub os_release: Option<String>,
}

impl RawHost {
    /// Read the raw identifiers from the running host.
    ///
    /// Prefers `uname` so that a 32-bit userland on a 64-bit kernel still
    /// reports the machine the release must run on; falls back to the
    /// compile-time constants when `uname` is unavailable.
    pub fn read(executor: &dyn Executor) -> Self {
        let uname = |flag: &str| {
            executor
                .run_unchecked("uname", &[flag])
                .ok()
                .filter(|r| r.success)
                .map(|r| r.stdout.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            os: uname("-s").unwrap_or_else(|| std::env::consts::OS.to_string()),
            arch: uname("-m").unwrap_or_else(|| std::env::consts::ARCH.to_string()),
            kernel: uname("-r").unwrap_or_default(),
            os_release: std::fs::read_to_string("/etc/os-release").ok(),
        }
    }
}

/// Normalized description of the host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProfile {
    /// Operating system.
    pub os: Os,
    /// Normalized architecture.
    pub arch: Arch,
    /// Kernel release string (may be empty).
    pub kernel_version: String,
    /// Distribution `ID` from os-release.
    pub distro_id: Option<String>,
    /// Distribution `VERSION_ID` from os-release.
    pub distro_version: Option<String>,
}

impl SystemProfile {
    /// Detect the current platform.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::UnsupportedPlatform`] or
    /// [`InstallError::UnsupportedArchitecture`] when the host cannot be
    /// mapped to a release artifact.
    pub fn detect(
        arch_override: Option<&str>,
        executor: &dyn Executor,
        log: &dyn Log,
    ) -> Result<Self, InstallError> {
        Self::from_raw(&RawHost::read(executor), arch_override, log)
    }

    /// Normalize raw host identifiers.
    ///
    /// # Errors
    ///
    /// See [`SystemProfile::detect`].
    pub fn from_raw(
        raw: &RawHost,
        arch_override: Option<&str>,
        log: &dyn Log,
    ) -> Result<Self, InstallError> {
        let os = Os::from_raw(&raw.os).ok_or_else(|| InstallError::UnsupportedPlatform {
            os: raw.os.clone(),
        })?;

        let arch = match arch_override.map(str::trim).filter(|s| !s.is_empty()) {
            Some(forced) => {
                let arch = Arch::from_raw(forced).ok_or_else(|| {
                    InstallError::UnsupportedArchitecture {
                        arch: forced.to_string(),
                    }
                })?;
                log.warn(&format!(
                    "using architecture override '{arch}' (host reports '{}')",
                    raw.arch
                ));
                arch
            }
            None => Arch::from_raw(&raw.arch).ok_or_else(|| {
                InstallError::UnsupportedArchitecture {
                    arch: raw.arch.clone(),
                }
            })?,
        };

        let release = raw.os_release.as_deref().unwrap_or_default();
        Ok(Self {
            os,
            arch,
            kernel_version: raw.kernel.clone(),
            distro_id: os_release_field(release, "ID"),
            distro_version: os_release_field(release, "VERSION_ID"),
        })
    }

    /// `{os}-{arch}` suffix used in release asset names.
    #[must_use]
    pub fn asset_suffix(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }
}

/// Extract `key` from os-release content, stripping surrounding quotes.
fn os_release_field(content: &str, key: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|v| !v.is_empty())
}
