//! Record loader
//!
//! Reads one tabular file and writes its rows into the matching table.
//!
//! A blocking producer parses the file row by row and hands off fixed-size
//! batches over a bounded channel; the async consumer inserts each batch in
//! its own transaction. Memory use is bounded by a few batches, no matter
//! how long the file is.
//!
//! # Row failures
//! The first malformed row ends the load with a [`ParseError`] naming the
//! row and column. Rows of the batch being filled are not inserted, while
//! batches committed before the failure stay committed.

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::config::LoaderOptions;
use crate::error::{IngestResult, LoadError, ParseError};
use crate::records::{RecordKind, RecordReader, Row, TableLayout, Value};

/// Batches buffered between the parser and the writer
const CHANNEL_CAPACITY: usize = 1;

type BatchResult = Result<Vec<Row>, ParseError>;

/// Outcome of one completed load
#[derive(Debug, Clone, Serialize)]
pub struct LoadStats {
    pub kind: RecordKind,
    pub table: &'static str,
    pub source: PathBuf,
    pub rows: u64,
    pub batches: usize,
}

pub struct RecordLoader {
    db: SqlitePool,
    options: LoaderOptions,
}

impl RecordLoader {
    pub fn new(db: SqlitePool, options: LoaderOptions) -> Self {
        Self { db, options }
    }

    /// Stream `path` into the table for `kind`
    #[instrument(skip(self, path), fields(table = kind.table(), source = %path.display()))]
    pub async fn load(&self, kind: RecordKind, path: &Path) -> IngestResult<LoadStats> {
        let layout = kind.layout();
        let batch_size = self.options.batch_size.max(1);

        let (tx, mut rx) = mpsc::channel::<BatchResult>(CHANNEL_CAPACITY);
        let source = path.to_path_buf();
        let producer = tokio::task::spawn_blocking(move || produce(&source, kind, batch_size, tx));

        let mut rows = 0u64;
        let mut batches = 0usize;

        while let Some(batch) = rx.recv().await {
            let batch = batch?;
            self.insert_batch(layout, &batch, rows + 1).await?;

            rows += batch.len() as u64;
            batches += 1;
            debug!(batch = batches, rows, "Batch committed");
        }

        producer.await.map_err(|e| LoadError::Producer {
            table: layout.table,
            reason: e.to_string(),
        })?;

        info!(rows, batches, "Load complete");

        Ok(LoadStats {
            kind,
            table: layout.table,
            source: path.to_path_buf(),
            rows,
            batches,
        })
    }

    async fn insert_batch(
        &self,
        layout: &'static TableLayout,
        batch: &[Row],
        first_row: u64,
    ) -> Result<(), LoadError> {
        let insert = |source| LoadError::Insert {
            table: layout.table,
            first_row,
            source,
        };

        let mut tx = self.db.begin().await.map_err(insert)?;

        // Large batches are split so no statement exceeds the bind limit;
        // every chunk still commits with the batch.
        for chunk in batch.chunks(layout.rows_per_statement()) {
            let mut query_builder = QueryBuilder::<Sqlite>::new(layout.insert_prefix());
            query_builder.push_values(chunk, |mut b, row| {
                for value in row.values() {
                    match value {
                        Value::Text(text) => b.push_bind(text.as_str()),
                        Value::Integer(n) => b.push_bind(*n),
                        Value::Date(date) => b.push_bind(*date),
                    };
                }
            });

            query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(insert)?;
        }

        tx.commit().await.map_err(insert)?;
        Ok(())
    }
}

/// Parse `path` and send full batches until the file ends or a row fails
fn produce(path: &Path, kind: RecordKind, batch_size: usize, tx: mpsc::Sender<BatchResult>) {
    let reader = match RecordReader::open(path, kind) {
        Ok(reader) => reader,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        },
    };

    let mut batch = Vec::with_capacity(batch_size);
    for row in reader {
        match row {
            Ok(row) => {
                batch.push(row);
                if batch.len() == batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    // The consumer hung up after an insert failure.
                    if tx.blocking_send(Ok(full)).is_err() {
                        return;
                    }
                }
            },
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            },
        }
    }

    if !batch.is_empty() {
        let _ = tx.blocking_send(Ok(batch));
    }
}
