//! Installer for the `typegenctl` release binary.
//!
//! A run resolves a release, downloads and unpacks its archive, finds the
//! binary inside whatever layout the archive uses, installs it, provisions
//! the application home and writes the configuration and service files
//! needed to run it.  A validation report closes the run.
//!
//! The public API is organised into layers:
//!
//! - **[`platform`]**: host detection and normalization
//! - **[`install`]**: one module per pipeline stage
//! - **[`resources`]**: idempotent `check + apply` primitives (directories, accounts)
//! - **[`validate`]**: post-install checks
//! - **[`pipeline`]**: sequencing of the stages and ownership of scratch state
//!
//! Side effects go through small traits ([`exec::Executor`],
//! [`http::HttpClient`], [`progress::Progress`], [`logging::Log`]) so every
//! stage runs headless under test.
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cancel;
pub mod cli;
pub mod error;
pub mod exec;
pub mod http;
pub mod install;
pub mod logging;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod resources;
pub mod validate;

#[cfg(test)]
mod test_helpers;
