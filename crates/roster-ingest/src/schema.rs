//! Schema manager
//!
//! Drops and recreates both record tables inside one transaction, so a run
//! either starts from two fresh tables or fails before anything is loaded.

use sqlx::SqlitePool;
use tracing::{debug, info, instrument};

use crate::error::SchemaError;
use crate::records::{RecordKind, TableLayout};

pub struct SchemaManager {
    db: SqlitePool,
}

impl SchemaManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Drop-if-exists then create every record table
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<(), SchemaError> {
        let layouts: Vec<&'static TableLayout> =
            RecordKind::ALL.iter().map(|kind| kind.layout()).collect();

        let mut tx = self.db.begin().await.map_err(SchemaError::Transaction)?;

        for layout in &layouts {
            debug!(table = layout.table, "Dropping table");
            sqlx::query(&layout.drop_table_sql())
                .execute(&mut *tx)
                .await
                .map_err(|source| SchemaError::Ddl {
                    table: layout.table,
                    source,
                })?;
        }

        for layout in &layouts {
            debug!(table = layout.table, columns = layout.columns.len(), "Creating table");
            sqlx::query(&layout.create_table_sql())
                .execute(&mut *tx)
                .await
                .map_err(|source| SchemaError::Ddl {
                    table: layout.table,
                    source,
                })?;
        }

        tx.commit().await.map_err(SchemaError::Transaction)?;

        info!(tables = layouts.len(), "Destination schema reset");
        Ok(())
    }
}
