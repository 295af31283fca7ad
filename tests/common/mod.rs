// Shared helpers for integration tests.
//
// Provides scripted stand-ins for the HTTP client and process executor, an
// in-memory log, and a release-archive builder, so each integration test can
// drive the installer inside a temporary directory without network access.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use typegen_installer::cancel::CancelToken;
use typegen_installer::error::InstallError;
use typegen_installer::exec::{ExecResult, Executor};
use typegen_installer::http::{HttpClient, HttpError};
use typegen_installer::install::fetch::Sleeper;
use typegen_installer::logging::{CheckStatus, Log};
use typegen_installer::pipeline::{self, Collaborators, InstallOptions, InstallOutcome};
use typegen_installer::progress::{NoProgress, Progress};

pub const META_URL: &str = "https://meta.invalid/releases/latest";
pub const DOWNLOAD_BASE: &str = "https://downloads.invalid/releases";
pub const CONNECTIVITY_URL: &str = "https://connectivity.invalid";

/// [`HttpClient`] answering from a fixed table; unknown URLs are 404.
#[derive(Debug, Default)]
pub struct StaticHttp {
    routes: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl StaticHttp {
    pub fn route(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn lookup(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(HttpError::Status(404))
    }
}

impl HttpClient for StaticHttp {
    fn get_text(&self, url: &str) -> Result<String, HttpError> {
        Ok(String::from_utf8_lossy(&self.lookup(url)?).into_owned())
    }

    fn download(
        &self,
        url: &str,
        out: &mut dyn Write,
        cancel: &CancelToken,
        _progress: &dyn Progress,
    ) -> Result<u64, HttpError> {
        let body = self.lookup(url)?;
        for chunk in body.chunks(512) {
            if cancel.is_cancelled() {
                return Err(HttpError::Interrupted);
            }
            out.write_all(chunk)?;
        }
        Ok(body.len() as u64)
    }

    fn post_json(&self, _url: &str, _json: &str) -> Result<(), HttpError> {
        Ok(())
    }

    fn check_reachable(&self, url: &str) -> Result<(), HttpError> {
        self.lookup(url).map(|_| ())
    }
}

/// [`Executor`] that answers `uname` like an x86-64 Linux host and reports
/// every other program as succeeding with `banner` on stdout.
#[derive(Debug)]
pub struct FakeHost {
    pub banner: String,
    pub calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new(banner: &str) -> Self {
        Self {
            banner: banner.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Executor for FakeHost {
    fn run_unchecked(&self, program: &str, args: &[&str]) -> anyhow::Result<ExecResult> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{program} {}", args.join(" ")));
        let stdout = match (program, args) {
            ("uname", ["-s"]) => "Linux".to_string(),
            ("uname", ["-m"]) => "x86_64".to_string(),
            ("uname", ["-r"]) => "6.8.0".to_string(),
            ("id", _) => "1000".to_string(),
            _ => self.banner.clone(),
        };
        Ok(ExecResult {
            stdout,
            stderr: String::new(),
            success: true,
            code: Some(0),
        })
    }

    fn run_bounded(
        &self,
        program: &str,
        args: &[&str],
        _timeout: Duration,
    ) -> anyhow::Result<ExecResult> {
        self.run_unchecked(program, args)
    }

    fn which(&self, _program: &str) -> bool {
        false
    }
}

/// [`Sleeper`] that returns immediately.
#[derive(Debug, Default)]
pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _delay: Duration, cancel: &CancelToken) -> Result<(), InstallError> {
        cancel.check()
    }
}

/// [`Log`] that keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    pub lines: Mutex<Vec<String>>,
    pub checks: Mutex<Vec<(String, CheckStatus)>>,
}

impl MemoryLog {
    pub fn warnings(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter_map(|l| l.strip_prefix("WARN ").map(str::to_string))
            .collect()
    }
}

impl Log for MemoryLog {
    fn stage(&self, msg: &str) {
        self.lines.lock().unwrap().push(format!("==> {msg}"));
    }
    fn info(&self, msg: &str) {
        self.lines.lock().unwrap().push(msg.to_string());
    }
    fn debug(&self, msg: &str) {
        self.lines.lock().unwrap().push(format!("DEBUG {msg}"));
    }
    fn warn(&self, msg: &str) {
        self.lines.lock().unwrap().push(format!("WARN {msg}"));
    }
    fn error(&self, msg: &str) {
        self.lines.lock().unwrap().push(format!("ERROR {msg}"));
    }
    fn record_check(&self, name: &str, status: CheckStatus, _message: Option<&str>) {
        self.checks.lock().unwrap().push((name.to_string(), status));
    }
}

/// Bytes that gzip cannot shrink, so archives stay above the size floor.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state.to_le_bytes()[0]
        })
        .collect()
}

/// Build a `.tar.gz` from `(path, mode)` entries, each filled with noise.
pub fn release_archive(entries: &[(&str, u32)]) -> Vec<u8> {
    let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (name, mode) in entries {
        let data = noise(2048);
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Asset URL for `version` on the fake host.
pub fn asset_url(version: &str) -> String {
    format!("{DOWNLOAD_BASE}/v{version}/typegenctl-linux-amd64.tar.gz")
}

/// A sandbox with its own install dir, home, unit dir and scratch base.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
    pub http: Arc<StaticHttp>,
    pub host: FakeHost,
    pub log: MemoryLog,
    pub cancel: CancelToken,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create sandbox");
        for sub in ["bin", "units", "scratch"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        let http = Arc::new(StaticHttp::default());
        http.route(CONNECTIVITY_URL, Vec::new());
        Self {
            dir,
            http,
            host: FakeHost::new("typegenctl 0.0.0"),
            log: MemoryLog::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Publish a release whose archive contains `entries`.
    pub fn publish(&self, version: &str, entries: &[(&str, u32)]) {
        self.http.route(&asset_url(version), release_archive(entries));
        self.http.route(
            META_URL,
            format!(r#"{{"tag_name":"v{version}","name":"typegen {version}"}}"#),
        );
    }

    pub fn options(&self, release: &str) -> InstallOptions {
        InstallOptions {
            release: release.to_string(),
            no_telemetry: true,
            install_dir: self.path("bin"),
            home: self.path("home"),
            systemd_dir: self.path("units"),
            no_service_user: true,
            metadata_urls: vec![META_URL.to_string()],
            download_base: Some(DOWNLOAD_BASE.to_string()),
            connectivity_url: CONNECTIVITY_URL.to_string(),
            scratch_base: Some(self.path("scratch")),
            completion_dirs: Vec::new(),
            ..InstallOptions::default()
        }
    }

    pub fn run(&self, options: InstallOptions) -> Result<InstallOutcome, InstallError> {
        let http: Arc<dyn HttpClient> = self.http.clone();
        pipeline::run(
            options,
            &Collaborators {
                executor: &self.host,
                http: Arc::clone(&http),
                beacon_http: http,
                sleeper: &NoSleep,
                progress: &NoProgress,
                cancel: &self.cancel,
                log: &self.log,
            },
        )
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.path("scratch")).unwrap().next().is_none()
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap()
    }
}

/// Relative paths of every regular file under `root`, sorted.
pub fn files_under(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.display().to_string())
        })
        .collect();
    files.sort();
    files
}
