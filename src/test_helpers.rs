//! Shared fakes for unit tests.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::cancel::{CancelToken, Interrupt};
use crate::error::InstallError;
use crate::http::{HttpClient, HttpError};
use crate::install::fetch::Sleeper;
use crate::logging::{CheckStatus, Log};
use crate::progress::Progress;

/// [`Log`] implementation that records every message in memory.
#[derive(Debug, Default)]
pub struct RecordingLog {
    messages: Mutex<Vec<(&'static str, String)>>,
    checks: Mutex<Vec<(String, CheckStatus)>>,
}

impl RecordingLog {
    fn push(&self, level: &'static str, msg: &str) {
        self.messages.lock().unwrap().push((level, msg.to_string()));
    }

    fn level(&self, level: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.level("warn")
    }

    pub fn infos(&self) -> Vec<String> {
        self.level("info")
    }

    pub fn debugs(&self) -> Vec<String> {
        self.level("debug")
    }

    pub fn checks(&self) -> Vec<(String, CheckStatus)> {
        self.checks.lock().unwrap().clone()
    }
}

impl Log for RecordingLog {
    fn stage(&self, msg: &str) {
        self.push("stage", msg);
    }
    fn info(&self, msg: &str) {
        self.push("info", msg);
    }
    fn debug(&self, msg: &str) {
        self.push("debug", msg);
    }
    fn warn(&self, msg: &str) {
        self.push("warn", msg);
    }
    fn error(&self, msg: &str) {
        self.push("error", msg);
    }
    fn record_check(&self, name: &str, status: CheckStatus, _message: Option<&str>) {
        self.checks.lock().unwrap().push((name.to_string(), status));
    }
}

/// A scripted response for [`FakeHttp`].
#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// 200 with this body.
    Body(Vec<u8>),
    /// Non-success status.
    Status(u16),
    /// Connection failure.
    Transport,
    /// Write these bytes, then cancel the token and keep streaming.
    CancelMidway(Vec<u8>, CancelToken),
    /// Write these bytes, then deliver two interrupts to the token as a
    /// stalled transfer would see them.
    AbortMidway(Vec<u8>, CancelToken),
}

/// Scripted [`HttpClient`].
///
/// Each URL owns a queue of responses consumed in order; the last response
/// of a queue repeats.  Unscripted URLs answer 404.
#[derive(Debug, Default)]
pub struct FakeHttp {
    scripts: Mutex<HashMap<String, VecDeque<FakeResponse>>>,
    requests: Mutex<Vec<String>>,
    posts: Mutex<Vec<(String, String)>>,
    aborts: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeHttp {
    pub fn with(self, url: &str, response: FakeResponse) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }

    /// Scratch directories seen by aborts, with whether each still existed
    /// right after the abort.
    pub fn aborts(&self) -> Vec<(PathBuf, bool)> {
        self.aborts.lock().unwrap().clone()
    }

    fn next(&self, url: &str) -> FakeResponse {
        self.requests.lock().unwrap().push(url.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(FakeResponse::Status(404)),
            None => FakeResponse::Status(404),
        }
    }
}

impl HttpClient for FakeHttp {
    fn get_text(&self, url: &str) -> Result<String, HttpError> {
        match self.next(url) {
            FakeResponse::Body(body)
            | FakeResponse::CancelMidway(body, _)
            | FakeResponse::AbortMidway(body, _) => {
                Ok(String::from_utf8_lossy(&body).into_owned())
            }
            FakeResponse::Status(code) => Err(HttpError::Status(code)),
            FakeResponse::Transport => Err(HttpError::Transport("connection refused".into())),
        }
    }

    fn download(
        &self,
        url: &str,
        out: &mut dyn Write,
        cancel: &CancelToken,
        progress: &dyn Progress,
    ) -> Result<u64, HttpError> {
        match self.next(url) {
            FakeResponse::Body(body) => {
                progress.begin("downloading", Some(body.len() as u64));
                out.write_all(&body)?;
                progress.finish();
                Ok(body.len() as u64)
            }
            FakeResponse::CancelMidway(body, token) => {
                out.write_all(&body)?;
                token.cancel();
                if cancel.is_cancelled() {
                    return Err(HttpError::Interrupted);
                }
                Ok(body.len() as u64)
            }
            FakeResponse::AbortMidway(body, token) => {
                out.write_all(&body)?;
                let tracked = token.tracked_scratch();
                token.interrupt();
                if token.interrupt() == Interrupt::Abort
                    && let Some(dir) = tracked
                {
                    let exists = dir.exists();
                    self.aborts.lock().unwrap().push((dir, exists));
                }
                Err(HttpError::Interrupted)
            }
            FakeResponse::Status(code) => Err(HttpError::Status(code)),
            FakeResponse::Transport => Err(HttpError::Transport("connection reset".into())),
        }
    }

    fn post_json(&self, url: &str, json: &str) -> Result<(), HttpError> {
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), json.to_string()));
        Ok(())
    }

    fn check_reachable(&self, url: &str) -> Result<(), HttpError> {
        match self.next(url) {
            FakeResponse::Status(code) => Err(HttpError::Status(code)),
            FakeResponse::Transport => Err(HttpError::Transport("unreachable".into())),
            _ => Ok(()),
        }
    }
}

/// [`Sleeper`] that records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> Result<(), InstallError> {
        self.delays.lock().unwrap().push(delay);
        cancel.check()
    }
}

/// Write a `.tar.gz` at `path` containing `(name, contents, mode)` files.
pub fn write_tar_gz(path: &std::path::Path, files: &[(&str, &[u8], u32)]) {
    let file = std::fs::File::create(path).unwrap();
    let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (name, data, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
}

/// `len` bytes that gzip cannot shrink much.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state.to_le_bytes()[0]
        })
        .collect()
}
