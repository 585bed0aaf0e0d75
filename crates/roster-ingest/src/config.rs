//! Pipeline configuration
//!
//! Every component receives its settings explicitly; nothing reads global
//! state once a [`PipelineConfig`] has been built. `from_env` is the only
//! place environment variables (and `.env`) are consulted.

use anyhow::{Context, Result};
use reqwest::Url;
use roster_common::checksum::normalize_sha256;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default staging directory for the downloaded archive and its extraction.
pub const DEFAULT_STAGING_DIR: &str = "./data/staging";

/// Default file name of the staged archive inside the staging directory.
pub const DEFAULT_ARCHIVE_NAME: &str = "dataset.tar.gz";

/// Default destination store (SQLite database file).
pub const DEFAULT_DATABASE_PATH: &str = "./data/roster.db";

/// Sub-directory of the staging directory that receives the unpacked tree.
pub const EXTRACTED_DIR_NAME: &str = "extracted";

/// Rows committed per insert transaction.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Destination store location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_PATH)
    }
}

/// Resource fetcher settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Permit plain `http://` sources (local mirrors, tests)
    pub allow_insecure_http: bool,
    /// Lowercase hex SHA-256 the archive must match
    pub expected_sha256: Option<String>,
    /// TCP connect timeout; `None` keeps the transport default
    pub connect_timeout_secs: Option<u64>,
    /// Render an indicatif progress bar while downloading
    pub show_progress: bool,
}

impl FetchOptions {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

/// Record loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderOptions {
    pub batch_size: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Full configuration of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source_url: String,
    pub staging_dir: PathBuf,
    pub archive_name: String,
    pub store: StoreConfig,
    pub fetch: FetchOptions,
    pub loader: LoaderOptions,
}

impl PipelineConfig {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            store: StoreConfig::default(),
            fetch: FetchOptions::default(),
            loader: LoaderOptions::default(),
        }
    }

    /// Load configuration from `.env` and `ROSTER_*` environment variables
    ///
    /// - `ROSTER_SOURCE_URL` (required)
    /// - `ROSTER_STAGING_DIR`
    /// - `ROSTER_ARCHIVE_NAME`
    /// - `ROSTER_DATABASE_PATH`
    /// - `ROSTER_ALLOW_INSECURE_HTTP`
    /// - `ROSTER_EXPECTED_SHA256`
    /// - `ROSTER_CONNECT_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_source(None)
    }

    /// Like [`from_env`](Self::from_env), with `source_url` taking precedence
    /// over `ROSTER_SOURCE_URL`
    pub fn from_env_with_source(source_url: Option<String>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let source_url = match source_url {
            Some(url) => url,
            None => std::env::var("ROSTER_SOURCE_URL").context("ROSTER_SOURCE_URL not set")?,
        };

        let mut config = Self::new(source_url);

        if let Ok(dir) = std::env::var("ROSTER_STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        if let Ok(name) = std::env::var("ROSTER_ARCHIVE_NAME") {
            config.archive_name = name;
        }
        if let Ok(path) = std::env::var("ROSTER_DATABASE_PATH") {
            config.store = StoreConfig::new(path);
        }

        config.fetch.allow_insecure_http = std::env::var("ROSTER_ALLOW_INSECURE_HTTP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        config.fetch.connect_timeout_secs = std::env::var("ROSTER_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok());

        if let Ok(raw) = std::env::var("ROSTER_EXPECTED_SHA256") {
            config.fetch.expected_sha256 =
                Some(normalize_sha256(&raw).context("Invalid ROSTER_EXPECTED_SHA256")?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.source_url)
            .with_context(|| format!("Invalid source URL '{}'", self.source_url))?;

        match url.scheme() {
            "https" => {},
            "http" if self.fetch.allow_insecure_http => {
                tracing::warn!(url = %url, "Fetching over plain http");
            },
            "http" => anyhow::bail!(
                "Source URL '{}' is not https (set ROSTER_ALLOW_INSECURE_HTTP=true to permit)",
                self.source_url
            ),
            other => anyhow::bail!("Unsupported source URL scheme '{}'", other),
        }

        if self.archive_name.trim().is_empty() {
            anyhow::bail!("Archive name cannot be empty");
        }

        if Path::new(&self.archive_name).components().count() != 1 {
            anyhow::bail!(
                "Archive name '{}' must be a plain file name",
                self.archive_name
            );
        }

        if self.store.path.as_os_str().is_empty() {
            anyhow::bail!("Database path cannot be empty");
        }

        if self.loader.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        Ok(())
    }

    /// Where the fetcher stages the archive
    pub fn archive_path(&self) -> PathBuf {
        self.staging_dir.join(&self.archive_name)
    }

    /// Where the extractor unpacks the archive
    pub fn extract_dir(&self) -> PathBuf {
        self.staging_dir.join(EXTRACTED_DIR_NAME)
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn with_archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = name.into();
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = StoreConfig::new(path);
        self
    }

    pub fn with_insecure_http(mut self, allow: bool) -> Self {
        self.fetch.allow_insecure_http = allow;
        self
    }

    pub fn with_expected_sha256(mut self, checksum: impl Into<String>) -> Self {
        self.fetch.expected_sha256 = Some(checksum.into());
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.fetch.show_progress = show;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.loader.batch_size = batch_size;
        self
    }
}
