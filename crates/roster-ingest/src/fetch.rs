//! Resource fetcher
//!
//! Streams a remote resource to the staging area. The body is written to a
//! `.part` sibling of the destination and renamed into place only once it
//! has been fully written, synced and (optionally) checksum-verified, so the
//! destination path never holds truncated output.

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use roster_common::checksum::{verify_sha256, Sha256Digest};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::config::FetchOptions;
use crate::error::FetchError;

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("roster-ingest/", env!("CARGO_PKG_VERSION"));

/// A staged archive that was fully written
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

pub struct ResourceFetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl ResourceFetcher {
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .https_only(!options.allow_insecure_http);

        if let Some(timeout) = options.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }

        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self { client, options })
    }

    /// Download `url` to `dest`, creating parent directories as needed
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome, FetchError> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        // A previous run's archive must not survive a failed fetch.
        remove_if_exists(dest).await?;

        let partial = partial_path(dest);
        let (bytes, sha256) = match self.stream_to_file(url, &partial).await {
            Ok(written) => written,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            },
        };

        if let Some(expected) = &self.options.expected_sha256 {
            if verify_sha256(expected, &sha256).is_err() {
                discard(&partial).await;
                return Err(FetchError::ChecksumMismatch {
                    url: url.to_string(),
                    expected: expected.clone(),
                    actual: sha256,
                });
            }
            debug!("Checksum verified");
        }

        if let Err(source) = tokio::fs::rename(&partial, dest).await {
            discard(&partial).await;
            return Err(FetchError::Io {
                path: dest.to_path_buf(),
                source,
            });
        }

        info!(bytes, sha256 = %sha256, "Archive staged");

        Ok(FetchOutcome {
            url: url.to_string(),
            path: dest.to_path_buf(),
            bytes,
            sha256,
        })
    }

    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<(u64, String), FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let io = |source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let progress = self.progress_bar(response.content_length(), url);
        let mut file = tokio::fs::File::create(path).await.map_err(io)?;
        let mut digest = Sha256Digest::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport)?;
            file.write_all(&chunk).await.map_err(io)?;
            digest.update(&chunk);
            progress.set_position(digest.bytes());
        }

        file.flush().await.map_err(io)?;
        file.sync_all().await.map_err(io)?;
        drop(file);

        progress.finish_and_clear();
        debug!(bytes = digest.bytes(), "Response body written");

        Ok((digest.bytes(), digest.finalize_hex()))
    }

    fn progress_bar(&self, total: Option<u64>, url: &str) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let pb = match total {
            Some(len) => {
                let pb = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                pb
            },
            None => ProgressBar::new_spinner(),
        };
        pb.set_message(format!("Downloading {}", url));
        pb
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

async fn remove_if_exists(path: &Path) -> Result<(), FetchError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale file");
            Ok(())
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(FetchError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Discarded partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to discard partial download"),
    }
}
