//! HTTP access to release metadata, release assets and the telemetry beacon.
//!
//! Stages talk to the network only through [`HttpClient`] so tests can
//! script responses without sockets.  [`UreqClient`] is the production
//! implementation.
use std::io::{Read as _, Write};
use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancelToken;
use crate::progress::Progress;

/// TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read buffer size for streamed downloads.
const CHUNK_SIZE: usize = 64 * 1024;

/// `User-Agent` header sent with every request.
const USER_AGENT: &str = concat!("typegen-install/", env!("CARGO_PKG_VERSION"));

/// Failure of a single HTTP exchange.
#[derive(Error, Debug)]
pub enum HttpError {
    /// The server answered with a non-success status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Connection, TLS, or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Local I/O failure while reading the body or writing it out.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cancellation was requested while the body was streaming.
    #[error("interrupted")]
    Interrupted,
}

impl From<ureq::Error> for HttpError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::StatusCode(code) => Self::Status(code),
            ureq::Error::Io(io) => Self::Io(io),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Minimal HTTP surface used by the pipeline.
pub trait HttpClient: Send + Sync {
    /// GET `url` and return the body as text.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpError`] on any non-success status or transport failure.
    fn get_text(&self, url: &str) -> Result<String, HttpError>;

    /// GET `url` and stream the body into `out`, returning the byte count.
    ///
    /// Implementations must poll `cancel` between chunks.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Interrupted`] when cancelled, otherwise as
    /// [`HttpClient::get_text`].
    fn download(
        &self,
        url: &str,
        out: &mut dyn Write,
        cancel: &CancelToken,
        progress: &dyn Progress,
    ) -> Result<u64, HttpError>;

    /// POST a JSON document to `url`, discarding the response body.
    ///
    /// # Errors
    ///
    /// As [`HttpClient::get_text`].
    fn post_json(&self, url: &str, json: &str) -> Result<(), HttpError>;

    /// Issue a HEAD request to check that `url` is reachable.
    ///
    /// # Errors
    ///
    /// As [`HttpClient::get_text`].
    fn check_reachable(&self, url: &str) -> Result<(), HttpError>;
}

/// [`HttpClient`] backed by a shared `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    /// Create a client whose requests are bounded by `timeout` end to end.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }
}

impl HttpClient for UreqClient {
    fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .call()?;
        Ok(response.body_mut().read_to_string()?)
    }

    fn download(
        &self,
        url: &str,
        out: &mut dyn Write,
        cancel: &CancelToken,
        progress: &dyn Progress,
    ) -> Result<u64, HttpError> {
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()?;
        let total = response.body().content_length();
        progress.begin("downloading", total);

        let mut reader = response.body_mut().as_reader();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                progress.abandon();
                return Err(HttpError::Interrupted);
            }
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    progress.abandon();
                    return Err(e.into());
                }
            };
            out.write_all(buf.get(..n).unwrap_or_default())?;
            written += n as u64;
            progress.advance(written);
        }
        progress.finish();
        Ok(written)
    }

    fn post_json(&self, url: &str, json: &str) -> Result<(), HttpError> {
        self.agent
            .post(url)
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .send(json)?;
        Ok(())
    }

    fn check_reachable(&self, url: &str) -> Result<(), HttpError> {
        self.agent
            .head(url)
            .header("User-Agent", USER_AGENT)
            .call()?;
        Ok(())
    }
}
