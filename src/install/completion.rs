//! Best-effort bash completion for the managed binary.
use std::fs;
use std::path::{Path, PathBuf};

use super::BINARY_NAME;
use super::binary::SELF_CHECK_TIMEOUT;
use crate::exec::Executor;
use crate::logging::Log;

/// System-wide bash completion directories, in order of preference.
pub const BASH_COMPLETION_DIRS: &[&str] = &[
    "/usr/share/bash-completion/completions",
    "/etc/bash_completion.d",
];

/// Install the completion script produced by `{binary} completion bash`
/// into the first existing directory of `dirs`.
///
/// Returns the written path.  Every failure is logged as a warning.
pub fn install_completion(
    binary: &Path,
    dirs: &[PathBuf],
    executor: &dyn Executor,
    log: &dyn Log,
) -> Option<PathBuf> {
    let Some(dir) = dirs.iter().find(|d| d.is_dir()) else {
        log.debug("no bash completion directory found; skipping completion");
        return None;
    };

    let program = binary.to_string_lossy();
    let script = match executor.run_bounded(
        &program,
        &["completion", "bash"],
        SELF_CHECK_TIMEOUT,
    ) {
        Ok(result) if result.success && !result.stdout.trim().is_empty() => result.stdout,
        Ok(result) if !result.success => {
            log.warn(&format!(
                "cannot generate bash completion: {BINARY_NAME} exited {}",
                result.code.unwrap_or(-1)
            ));
            return None;
        }
        Ok(_) => {
            log.warn(&format!("{BINARY_NAME} produced an empty completion script"));
            return None;
        }
        Err(e) => {
            log.warn(&format!("cannot generate bash completion: {e:#}"));
            return None;
        }
    };

    let path = dir.join(BINARY_NAME);
    if let Err(e) = fs::write(&path, script) {
        log.warn(&format!("cannot write {}: {e}", path.display()));
        return None;
    }
    log.info(&format!("installed bash completion {}", path.display()));
    Some(path)
}

/// [`BASH_COMPLETION_DIRS`] as owned paths.
#[must_use]
pub fn default_dirs() -> Vec<PathBuf> {
    BASH_COMPLETION_DIRS.iter().map(PathBuf::from).collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exec::{ExecResult, MockExecutor};
    use crate::test_helpers::RecordingLog;

    fn answering(stdout: &'static str, success: bool) -> MockExecutor {
        let mut mock = MockExecutor::new();
        mock.expect_run_bounded().returning(move |_, args, _| {
            assert_eq!(args, ["completion", "bash"]);
            Ok(ExecResult {
                stdout: stdout.to_string(),
                success,
                code: Some(i32::from(!success)),
                ..ExecResult::default()
            })
        });
        mock
    }

    #[test]
    fn writes_script_into_first_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().join("missing"), dir.path().to_path_buf()];
        let mock = answering("complete -F _typegenctl typegenctl\n", true);
        let log = RecordingLog::default();

        let path = install_completion(Path::new("/usr/local/bin/typegenctl"), &dirs, &mock, &log)
            .unwrap();

        assert_eq!(path, dir.path().join("typegenctl"));
        assert!(fs::read_to_string(path).unwrap().contains("complete -F"));
    }

    #[test]
    fn failing_binary_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        let mock = answering("", false);
        let log = RecordingLog::default();

        assert!(install_completion(Path::new("/bin/typegenctl"), &dirs, &mock, &log).is_none());
        assert_eq!(log.warnings().len(), 1);
    }

    #[test]
    fn no_directory_is_silent_skip() {
        let mock = MockExecutor::new();
        let log = RecordingLog::default();
        let dirs = vec![PathBuf::from("/definitely/not/here")];
        assert!(install_completion(Path::new("/bin/typegenctl"), &dirs, &mock, &log).is_none());
        assert!(log.warnings().is_empty());
    }
}
