//! Roster Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Downloads a gzip-compressed tar archive of tabular roster data, unpacks
//! it, resets the destination store and loads individual and organization
//! records into their tables.
//!
//! # Stages
//!
//! - **Fetch**: stream the archive to the staging directory ([`fetch`])
//! - **Extract**: gunzip and untar in a single pass ([`extract`])
//! - **Schema**: drop and recreate both tables ([`schema`])
//! - **Load**: stream each file into its table in batches ([`loader`])
//!
//! [`pipeline::IngestPipeline`] runs them in order and reports the stage
//! that failed.
//!
//! # Example
//!
//! ```no_run
//! use roster_ingest::{IngestPipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::new("https://example.com/roster.tar.gz")
//!         .with_staging_dir("./data/staging")
//!         .with_database_path("./data/roster.db");
//!
//!     let report = IngestPipeline::new(config).run().await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod loader;
pub mod pipeline;
pub mod records;
pub mod schema;
pub mod store;

pub use config::{PipelineConfig, StoreConfig};
pub use error::{IngestError, IngestResult, PipelineError, Stage};
pub use pipeline::{IngestPipeline, PipelineReport, PipelineState};
pub use records::RecordKind;
