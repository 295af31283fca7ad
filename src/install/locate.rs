//! Locating the executable inside an extracted archive of unknown layout.
//!
//! Release archives have shipped the binary at the root, under `bin/` or
//! `dist/`, with and without a platform suffix.  [`BinaryLocator`] tries an
//! ordered chain of [`LocateStrategy`] implementations, from the most
//! specific to the most permissive, and reports which one matched.
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::archive::ExtractedTree;
use crate::error::InstallError;
use crate::logging::Log;
use crate::platform::SystemProfile;

/// What the locator is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Bare binary name, e.g. `typegenctl`.
    pub binary: String,
    /// Platform suffix, e.g. `linux-amd64`.
    pub suffix: String,
}

impl Target {
    /// Target for `binary` on the platform described by `profile`.
    #[must_use]
    pub fn new(binary: &str, profile: &SystemProfile) -> Self {
        Self {
            binary: binary.to_string(),
            suffix: profile.asset_suffix(),
        }
    }

    /// Binary name with the platform suffix, e.g. `typegenctl-linux-amd64`.
    #[must_use]
    pub fn suffixed_name(&self) -> String {
        format!("{}-{}", self.binary, self.suffix)
    }
}

/// The binary that was found and the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedBinary {
    /// Absolute path inside the extracted tree.
    pub path: PathBuf,
    /// 1-based position of the matching strategy in the chain.
    pub strategy_index: usize,
    /// Name of the matching strategy.
    pub strategy: &'static str,
}

/// One way of finding the binary.
pub trait LocateStrategy: Send + Sync {
    /// Short kebab-case name used in logs.
    fn name(&self) -> &'static str;

    /// Return the candidate path, if this strategy finds one.
    fn try_locate(&self, root: &Path, target: &Target) -> Option<PathBuf>;
}

/// Regular files under `root`, depth-first, sorted by file name.
fn files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
}

fn file_name_is(path: &Path, name: &str) -> bool {
    path.file_name().is_some_and(|n| n == name)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("exe"))
}

/// A file named exactly like the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactName;

impl LocateStrategy for ExactName {
    fn name(&self) -> &'static str {
        "exact-name"
    }

    fn try_locate(&self, root: &Path, target: &Target) -> Option<PathBuf> {
        files(root).find(|p| file_name_is(p, &target.binary))
    }
}

/// A file named `{binary}-{os}-{arch}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformSuffixed;

impl LocateStrategy for PlatformSuffixed {
    fn name(&self) -> &'static str {
        "platform-suffixed"
    }

    fn try_locate(&self, root: &Path, target: &Target) -> Option<PathBuf> {
        let name = target.suffixed_name();
        files(root).find(|p| file_name_is(p, &name))
    }
}

/// An executable file whose name contains the binary name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutableSubstring;

impl LocateStrategy for ExecutableSubstring {
    fn name(&self) -> &'static str {
        "executable-substring"
    }

    fn try_locate(&self, root: &Path, target: &Target) -> Option<PathBuf> {
        files(root).find(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().contains(&target.binary))
                && is_executable(p)
        })
    }
}

/// One of the conventional relative paths releases have used.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConventionalSubpath;

impl ConventionalSubpath {
    /// Candidate paths relative to the extraction root, in order.
    #[must_use]
    pub fn candidates(target: &Target) -> Vec<PathBuf> {
        let bin = &target.binary;
        vec![
            Path::new("bin").join(bin),
            Path::new("dist").join(bin),
            Path::new("usr/local/bin").join(bin),
            PathBuf::from(target.suffixed_name()),
        ]
    }
}

impl LocateStrategy for ConventionalSubpath {
    fn name(&self) -> &'static str {
        "conventional-subpath"
    }

    fn try_locate(&self, root: &Path, target: &Target) -> Option<PathBuf> {
        Self::candidates(target)
            .into_iter()
            .map(|rel| root.join(rel))
            .find(|p| p.is_file())
    }
}

/// The first executable file in traversal order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstExecutable;

impl LocateStrategy for FirstExecutable {
    fn name(&self) -> &'static str {
        "first-executable"
    }

    fn try_locate(&self, root: &Path, _target: &Target) -> Option<PathBuf> {
        files(root).find(|p| is_executable(p))
    }
}

/// The first regular file in traversal order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstFile;

impl LocateStrategy for FirstFile {
    fn name(&self) -> &'static str {
        "first-file"
    }

    fn try_locate(&self, root: &Path, _target: &Target) -> Option<PathBuf> {
        files(root).next()
    }
}

/// Ordered chain of [`LocateStrategy`] implementations.
pub struct BinaryLocator {
    strategies: Vec<Box<dyn LocateStrategy>>,
}

impl std::fmt::Debug for BinaryLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryLocator")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

impl Default for BinaryLocator {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ExactName),
            Box::new(PlatformSuffixed),
            Box::new(ExecutableSubstring),
            Box::new(ConventionalSubpath),
            Box::new(FirstExecutable),
            Box::new(FirstFile),
        ])
    }
}

impl BinaryLocator {
    /// Build a locator from an explicit chain.
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn LocateStrategy>>) -> Self {
        Self { strategies }
    }

    /// Strategy names in the order they are tried.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain against `tree`, returning the first match.
    ///
    /// Every strategy after the first logs a warning before it runs.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::BinaryNotFound`] with a listing of the tree
    /// when no strategy matches.
    pub fn locate(
        &self,
        tree: &ExtractedTree,
        target: &Target,
        log: &dyn Log,
    ) -> Result<LocatedBinary, InstallError> {
        for (i, strategy) in self.strategies.iter().enumerate() {
            if i > 0 {
                log.warn(&format!(
                    "{} not found yet; trying {} strategy",
                    target.binary,
                    strategy.name()
                ));
            }
            if let Some(path) = strategy.try_locate(&tree.root, target) {
                log.debug(&format!(
                    "located {} via {} strategy",
                    path.display(),
                    strategy.name()
                ));
                return Ok(LocatedBinary {
                    path,
                    strategy_index: i + 1,
                    strategy: strategy.name(),
                });
            }
        }
        Err(InstallError::BinaryNotFound {
            binary: target.binary.clone(),
            listing: tree.listing(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};
    use crate::test_helpers::RecordingLog;
    use std::fs;

    fn target() -> Target {
        let profile = SystemProfile {
            os: Os::Linux,
            arch: Arch::Amd64,
            kernel_version: String::new(),
            distro_id: None,
            distro_version: None,
        };
        Target::new("typegenctl", &profile)
    }

    fn tree(files: &[(&str, u32)]) -> (tempfile::TempDir, ExtractedTree) {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = Vec::new();
        for (rel, mode) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"#!/bin/sh\n").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(*mode)).unwrap();
            }
            #[cfg(not(unix))]
            let _ = mode;
            entries.push(PathBuf::from(rel));
        }
        let tree = ExtractedTree {
            root: dir.path().to_path_buf(),
            entries,
        };
        (dir, tree)
    }

    #[test]
    fn exact_name_wins_first() {
        let (_dir, tree) = tree(&[("pkg/typegenctl", 0o755), ("typegenctl-linux-amd64", 0o755)]);
        let log = RecordingLog::default();
        let found = BinaryLocator::default().locate(&tree, &target(), &log).unwrap();
        assert_eq!(found.strategy, "exact-name");
        assert_eq!(found.strategy_index, 1);
        assert!(log.warnings().is_empty());
    }

    #[test]
    fn dist_suffixed_binary_uses_platform_strategy() {
        let (_dir, tree) = tree(&[("dist/typegenctl-linux-amd64", 0o755)]);
        let log = RecordingLog::default();
        let found = BinaryLocator::default().locate(&tree, &target(), &log).unwrap();
        assert_eq!(found.strategy, "platform-suffixed");
        assert_eq!(found.strategy_index, 2);
        assert!(found.strategy_index < 5);
        assert!(found.path.ends_with("dist/typegenctl-linux-amd64"));
        assert_eq!(log.warnings().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn substring_requires_executable_bit() {
        let (_dir, tree) = tree(&[
            ("a/typegenctl.sha256", 0o644),
            ("b/typegenctl-v2", 0o755),
        ]);
        let log = RecordingLog::default();
        let found = BinaryLocator::default().locate(&tree, &target(), &log).unwrap();
        assert_eq!(found.strategy, "executable-substring");
        assert!(found.path.ends_with("b/typegenctl-v2"));
    }

    #[cfg(unix)]
    #[test]
    fn first_executable_before_first_file() {
        let (_dir, tree) = tree(&[("LICENSE", 0o644), ("tool/run", 0o755)]);
        let log = RecordingLog::default();
        let found = BinaryLocator::default().locate(&tree, &target(), &log).unwrap();
        assert_eq!(found.strategy, "first-executable");
        assert_eq!(found.strategy_index, 5);
        assert_eq!(log.warnings().len(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn first_file_is_last_resort() {
        let (_dir, tree) = tree(&[("z.txt", 0o644), ("a.txt", 0o644)]);
        let log = RecordingLog::default();
        let found = BinaryLocator::default().locate(&tree, &target(), &log).unwrap();
        assert_eq!(found.strategy, "first-file");
        assert!(found.path.ends_with("a.txt"), "traversal is sorted by name");
    }

    #[test]
    fn empty_tree_lists_contents_in_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        let tree = ExtractedTree {
            root: dir.path().to_path_buf(),
            entries: vec![PathBuf::from("docs/")],
        };
        let log = RecordingLog::default();
        let err = BinaryLocator::default()
            .locate(&tree, &target(), &log)
            .unwrap_err();
        assert!(matches!(err, InstallError::BinaryNotFound { ref listing, .. } if listing == "docs/"));
    }

    #[test]
    fn conventional_candidates_are_ordered() {
        let names: Vec<String> = ConventionalSubpath::candidates(&target())
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "bin/typegenctl",
                "dist/typegenctl",
                "usr/local/bin/typegenctl",
                "typegenctl-linux-amd64",
            ]
        );
    }

    #[test]
    fn custom_chain_is_respected() {
        let (_dir, tree) = tree(&[("bin/typegenctl", 0o755)]);
        let log = RecordingLog::default();
        let locator = BinaryLocator::new(vec![Box::new(ConventionalSubpath)]);
        let found = locator.locate(&tree, &target(), &log).unwrap();
        assert_eq!(found.strategy_index, 1);
        assert_eq!(locator.strategy_names(), vec!["conventional-subpath"]);
    }
}
