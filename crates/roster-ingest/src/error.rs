//! Error types for the ingestion pipeline
//!
//! Each stage raises its own error kind carrying the URL, path, table or row
//! it was working on. [`IngestError`] unifies them, and the orchestrator wraps
//! that in a [`PipelineError`] naming the [`Stage`] that failed.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::records::RecordKind;

/// Network/transport failure or non-success response while fetching
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
}

/// Corrupt archive, decompression failure or unpack failure
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to open archive {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction target {} does not exist", .path.display())]
    MissingTarget { path: PathBuf },

    #[error("Failed to unpack {}: {source}", .archive.display())]
    Unpack {
        archive: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to unpack entry '{entry}' outside {}", .target.display())]
    UnsafeEntry { entry: String, target: PathBuf },

    #[error("Archive {} contains no entries", .path.display())]
    EmptyArchive { path: PathBuf },

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Store unreachable or DDL failure
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to open store {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to reset table {table}: {source}")]
    Ddl {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Schema transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),
}

/// Malformed row, missing required column or mismatched header
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Record source {} not found", .path.display())]
    MissingSource { path: PathBuf },

    #[error("Failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to read header of {}: {source}", .path.display())]
    Header {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Header of {} is missing required column '{column}'", .path.display())]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("{}: row {row} has no value for required column '{column}'", .path.display())]
    MissingValue {
        path: PathBuf,
        row: u64,
        column: &'static str,
    },

    #[error("{}: row {row} column '{column}' has invalid value '{value}': {reason}", .path.display())]
    InvalidField {
        path: PathBuf,
        row: u64,
        column: &'static str,
        value: String,
        reason: String,
    },

    #[error("{}: failed to read row {row}: {source}", .path.display())]
    Read {
        path: PathBuf,
        row: u64,
        #[source]
        source: csv::Error,
    },
}

impl ParseError {
    /// 1-based data row the error refers to, if any
    pub fn row(&self) -> Option<u64> {
        match self {
            ParseError::MissingValue { row, .. }
            | ParseError::InvalidField { row, .. }
            | ParseError::Read { row, .. } => Some(*row),
            _ => None,
        }
    }
}

/// Store write or batch-insert failure
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to open store {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to insert batch starting at row {first_row} into {table}: {source}")]
    Insert {
        table: &'static str,
        first_row: u64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Row producer for {table} stopped unexpectedly: {reason}")]
    Producer { table: &'static str, reason: String },
}

/// Any failure raised by a pipeline component
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Failed to prepare {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Pipeline stage, used to report where a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Fetch,
    Extract,
    Schema,
    Load(RecordKind),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prepare => write!(f, "prepare"),
            Stage::Fetch => write!(f, "fetch"),
            Stage::Extract => write!(f, "extract"),
            Stage::Schema => write!(f, "schema"),
            Stage::Load(kind) => write!(f, "load:{}", kind),
        }
    }
}

/// Terminal error of a pipeline run
#[derive(Error, Debug)]
#[error("Pipeline failed at {stage} stage: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: IngestError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<IngestError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}
