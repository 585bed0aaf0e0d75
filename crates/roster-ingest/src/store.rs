//! Destination store access
//!
//! The store is a single SQLite file named by a [`StoreConfig`]. Each stage
//! opens its own handle, capped at one connection, and closes it when done.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::StoreConfig;
use crate::records::RecordKind;

/// Handle to the destination store
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the store file named by `config`
    pub async fn open(config: &StoreConfig) -> Result<Self, sqlx::Error> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(sqlx::Error::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        debug!(path = %config.path.display(), "Opened destination store");

        Ok(Self {
            pool,
            path: config.path.clone(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the table for `kind` exists
    pub async fn table_exists(&self, kind: RecordKind) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(kind.table())
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Number of rows in the table for `kind`
    pub async fn count_rows(&self, kind: RecordKind) -> Result<i64, sqlx::Error> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", kind.table());
        sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await
    }

    pub async fn close(self) {
        self.pool.close().await;
        debug!(path = %self.path.display(), "Closed destination store");
    }
}
