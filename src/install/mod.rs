//! Installation stages, one module per stage.
//!
//! Each stage is a small struct borrowing its collaborators and returning
//! its product by value; [`crate::pipeline`] sequences them.
pub mod archive;
pub mod binary;
pub mod completion;
pub mod config_doc;
pub mod fetch;
pub mod layout;
pub mod locate;
pub mod services;
pub mod telemetry;
pub mod version;

/// Name of the managed binary.
pub const BINARY_NAME: &str = "typegenctl";

/// Default release repository (`owner/name`).
pub const DEFAULT_REPO: &str = "typegen-dev/typegen";
