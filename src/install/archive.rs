//! Unpacking of gzip-compressed tar release archives.
use std::fmt::Display;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::cancel::CancelToken;
use crate::error::InstallError;
use crate::logging::Log;
use crate::progress::Progress;

/// Directory under the scratch root that receives the archive contents.
pub const EXTRACT_DIR: &str = "extract";

/// Result of unpacking an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTree {
    /// Directory the archive was unpacked into.
    pub root: PathBuf,
    /// Archive entries in archive order, relative to `root`.
    pub entries: Vec<PathBuf>,
}

impl ExtractedTree {
    /// Newline-separated listing of every extracted entry.
    #[must_use]
    pub fn listing(&self) -> String {
        self.entries
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn extraction(context: &str, e: impl Display) -> InstallError {
    InstallError::Extraction(format!("{context}: {e}"))
}

/// Unpack `archive` into `{scratch}/extract`.
///
/// Entries whose path would land outside the destination are refused with
/// a warning.  Cancellation is checked before each entry.
///
/// # Errors
///
/// Returns [`InstallError::Extraction`] if the archive is unreadable,
/// corrupt, or empty, and [`InstallError::Interrupted`] on cancellation.
pub fn extract(
    archive: &Path,
    scratch: &Path,
    cancel: &CancelToken,
    progress: &dyn Progress,
    log: &dyn Log,
) -> Result<ExtractedTree, InstallError> {
    let root = scratch.join(EXTRACT_DIR);
    fs::create_dir_all(&root).map_err(|e| extraction(&format!("creating {}", root.display()), e))?;

    progress.begin("extracting", None);
    match unpack(archive, &root, cancel, progress, log) {
        Ok(entries) if entries.is_empty() => {
            progress.abandon();
            Err(InstallError::Extraction(format!(
                "{} contains no files",
                archive.display()
            )))
        }
        Ok(entries) => {
            progress.finish();
            log.debug(&format!(
                "extracted {} entries into {}",
                entries.len(),
                root.display()
            ));
            Ok(ExtractedTree { root, entries })
        }
        Err(e) => {
            progress.abandon();
            Err(e)
        }
    }
}

fn unpack(
    archive: &Path,
    root: &Path,
    cancel: &CancelToken,
    progress: &dyn Progress,
    log: &dyn Log,
) -> Result<Vec<PathBuf>, InstallError> {
    let file = File::open(archive)
        .map_err(|e| extraction(&format!("opening {}", archive.display()), e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);

    let mut entries = Vec::new();
    for entry in tar.entries().map_err(|e| extraction("reading archive", e))? {
        cancel.check()?;
        let mut entry = entry.map_err(|e| extraction("reading entry", e))?;
        let path = entry
            .path()
            .map_err(|e| extraction("decoding entry path", e))?
            .into_owned();
        let unpacked = entry
            .unpack_in(root)
            .map_err(|e| extraction(&format!("unpacking {}", path.display()), e))?;
        if !unpacked {
            log.warn(&format!(
                "refusing archive entry outside the destination: {}",
                path.display()
            ));
            continue;
        }
        entries.push(path);
        progress.advance(entries.len() as u64);
    }
    Ok(entries)
}
