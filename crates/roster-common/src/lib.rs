//! Roster Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the roster workspace members.
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Checksums**: incremental and whole-file SHA-256 helpers
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use roster_common::checksum::compute_file_sha256;
//!
//! fn fingerprint(path: &str) -> roster_common::Result<String> {
//!     compute_file_sha256(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
