#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
//! Integration tests for archive extraction followed by binary location.
//!
//! Archives are built in memory, unpacked with [`archive::extract`] and then
//! searched with the default [`BinaryLocator`] chain, the same path the
//! pipeline takes.

mod common;

use common::{MemoryLog, noise, release_archive};
use typegen_installer::cancel::CancelToken;
use typegen_installer::error::InstallError;
use typegen_installer::install::archive::{self, ExtractedTree};
use typegen_installer::install::locate::{BinaryLocator, LocatedBinary, Target};
use typegen_installer::platform::{Arch, Os, SystemProfile};
use typegen_installer::progress::NoProgress;

fn target(arch: Arch) -> Target {
    let profile = SystemProfile {
        os: Os::Linux,
        arch,
        kernel_version: String::new(),
        distro_id: None,
        distro_version: None,
    };
    Target::new("typegenctl", &profile)
}

fn unpack(bytes: &[u8], scratch: &std::path::Path) -> ExtractedTree {
    let path = scratch.join("release.tar.gz");
    std::fs::write(&path, bytes).unwrap();
    archive::extract(
        &path,
        scratch,
        &CancelToken::new(),
        &NoProgress,
        &MemoryLog::default(),
    )
    .unwrap()
}

fn locate(entries: &[(&str, u32)], arch: Arch) -> (LocatedBinary, MemoryLog) {
    let scratch = tempfile::tempdir().unwrap();
    let tree = unpack(&release_archive(entries), scratch.path());
    let log = MemoryLog::default();
    let found = BinaryLocator::default()
        .locate(&tree, &target(arch), &log)
        .unwrap();
    (found, log)
}

// ---------------------------------------------------------------------------
// Snapshot: strategy order
// ---------------------------------------------------------------------------

/// Snapshot of the default strategy chain in the order it is tried.
///
/// Any reordering changes which file wins for ambiguous archives, so it
/// must be a deliberate snapshot update.
#[test]
fn locator_strategy_order() {
    let names = BinaryLocator::default().strategy_names();
    insta::assert_snapshot!("locator_strategy_order", names.join("\n"));
}

// ---------------------------------------------------------------------------
// Layouts seen in published releases
// ---------------------------------------------------------------------------

#[test]
fn versioned_top_level_directory() {
    let (found, log) = locate(
        &[
            ("typegenctl-1.4.0/LICENSE", 0o644),
            ("typegenctl-1.4.0/typegenctl", 0o755),
        ],
        Arch::Amd64,
    );
    assert_eq!(found.strategy, "exact-name");
    assert!(found.path.ends_with("typegenctl-1.4.0/typegenctl"));
    assert!(log.warnings().is_empty());
}

#[test]
fn suffixed_binary_for_requested_arch_only() {
    let entries = [
        ("dist/typegenctl-linux-amd64", 0o755),
        ("dist/typegenctl-linux-arm64", 0o755),
    ];
    let (found, _) = locate(&entries, Arch::Arm64);
    assert_eq!(found.strategy_index, 2);
    assert!(found.path.ends_with("dist/typegenctl-linux-arm64"));
}

#[test]
fn unrelated_archive_falls_back_to_first_executable() {
    let (found, log) = locate(
        &[("README", 0o644), ("scripts/z-run", 0o755), ("scripts/a-run", 0o755)],
        Arch::Amd64,
    );
    assert_eq!(found.strategy, "first-executable");
    assert!(found.path.ends_with("scripts/a-run"));
    assert_eq!(log.warnings().len(), 4);
}

#[cfg(unix)]
#[test]
fn symlinked_conventional_path_is_followed() {
    let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);

    let payload = noise(2048);
    let mut header = tar::Header::new_gnu();
    header.set_size(payload.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "libexec/payload", payload.as_slice())
        .unwrap();

    let mut link = tar::Header::new_gnu();
    link.set_entry_type(tar::EntryType::Symlink);
    link.set_size(0);
    link.set_mode(0o777);
    builder
        .append_link(&mut link, "bin/typegenctl", "../libexec/payload")
        .unwrap();
    let bytes = builder.into_inner().unwrap().finish().unwrap();

    let scratch = tempfile::tempdir().unwrap();
    let tree = unpack(&bytes, scratch.path());
    let found = BinaryLocator::default()
        .locate(&tree, &target(Arch::Amd64), &MemoryLog::default())
        .unwrap();

    assert_eq!(found.strategy, "conventional-subpath");
    assert_eq!(found.strategy_index, 4);
    assert!(found.path.ends_with("bin/typegenctl"));
}

#[test]
fn directory_only_archive_reports_listing() {
    let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "empty-release/", std::io::empty())
        .unwrap();
    let bytes = builder.into_inner().unwrap().finish().unwrap();

    let scratch = tempfile::tempdir().unwrap();
    let tree = unpack(&bytes, scratch.path());
    let err = BinaryLocator::default()
        .locate(&tree, &target(Arch::Amd64), &MemoryLog::default())
        .unwrap_err();

    assert!(
        matches!(err, InstallError::BinaryNotFound { ref listing, .. } if listing.contains("empty-release")),
        "{err}"
    );
}

#[test]
fn corrupt_archive_is_extraction_error() {
    let scratch = tempfile::tempdir().unwrap();
    let path = scratch.path().join("release.tar.gz");
    std::fs::write(&path, noise(4096)).unwrap();

    let err = archive::extract(
        &path,
        scratch.path(),
        &CancelToken::new(),
        &NoProgress,
        &MemoryLog::default(),
    )
    .unwrap_err();

    assert!(matches!(err, InstallError::Extraction(_)), "{err}");
}
