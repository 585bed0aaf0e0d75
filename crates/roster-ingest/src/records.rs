//! Record types, table layouts and the streaming tabular reader
//!
//! The two record types have fixed layouts. Each [`ColumnSpec`] ties a
//! header name in the source file to a destination column and its type, so
//! the schema manager and the loader work from the same definition.
//!
//! # File Format
//! Comma-delimited UTF-8 text. The first line is a header naming columns
//! exactly as listed in the layout; every following line is one record.
//! Columns absent from the layout are ignored.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ParseError;

/// Date format used by the source files and the store
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Bind parameters SQLite accepts in one statement
pub const SQLITE_MAX_VARIABLES: usize = 32766;

/// One of the two fixed entity categories ingested by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Individual,
    Organization,
}

impl RecordKind {
    /// Load order used by the pipeline
    pub const ALL: [RecordKind; 2] = [RecordKind::Individual, RecordKind::Organization];

    pub fn layout(self) -> &'static TableLayout {
        match self {
            RecordKind::Individual => &INDIVIDUALS,
            RecordKind::Organization => &ORGANIZATIONS,
        }
    }

    pub fn table(self) -> &'static str {
        self.layout().table
    }

    /// Path of this record type's file relative to the extracted root
    pub fn file_name(self) -> &'static str {
        self.layout().file_name
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "individual" | "individuals" => Ok(RecordKind::Individual),
            "organization" | "organizations" => Ok(RecordKind::Organization),
            other => Err(format!(
                "unknown record type '{}' (expected individuals or organizations)",
                other
            )),
        }
    }
}

/// Storage type of a destination column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Date,
    Integer,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Date => "DATE",
            ColumnType::Integer => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Header name in the source file (case- and spelling-sensitive)
    pub header: &'static str,
    /// Column name in the destination table
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn column(header: &'static str, name: &'static str, ty: ColumnType) -> ColumnSpec {
    ColumnSpec { header, name, ty }
}

/// Fixed destination layout of one record type
#[derive(Debug)]
pub struct TableLayout {
    pub table: &'static str,
    pub file_name: &'static str,
    pub columns: &'static [ColumnSpec],
}

pub static INDIVIDUALS: TableLayout = TableLayout {
    table: "individuals",
    file_name: "individuals.csv",
    columns: &[
        column("Index", "record_index", ColumnType::Text),
        column("Customer Id", "customer_id", ColumnType::Text),
        column("First Name", "first_name", ColumnType::Text),
        column("Last Name", "last_name", ColumnType::Text),
        column("Company", "company", ColumnType::Text),
        column("City", "city", ColumnType::Text),
        column("Country", "country", ColumnType::Text),
        column("Phone 1", "phone_1", ColumnType::Text),
        column("Phone 2", "phone_2", ColumnType::Text),
        column("Email", "email", ColumnType::Text),
        column("Subscription Date", "subscription_date", ColumnType::Date),
        column("Website", "website", ColumnType::Text),
    ],
};

pub static ORGANIZATIONS: TableLayout = TableLayout {
    table: "organizations",
    file_name: "organizations.csv",
    columns: &[
        column("Index", "record_index", ColumnType::Text),
        column("Organization Id", "organization_id", ColumnType::Text),
        column("Name", "name", ColumnType::Text),
        column("Website", "website", ColumnType::Text),
        column("Country", "country", ColumnType::Text),
        column("Description", "description", ColumnType::Text),
        column("Founded", "founded", ColumnType::Integer),
        column("Industry", "industry", ColumnType::Text),
        column("Number of employees", "number_of_employees", ColumnType::Integer),
    ],
};

impl TableLayout {
    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS \"{}\"", self.table)
    }

    pub fn create_table_sql(&self) -> String {
        let mut columns = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        columns.extend(
            self.columns
                .iter()
                .map(|c| format!("\"{}\" {} NOT NULL", c.name, c.ty.sql())),
        );
        format!("CREATE TABLE \"{}\" ({})", self.table, columns.join(", "))
    }

    /// Rows that fit in one INSERT without exceeding the bind-parameter limit
    pub fn rows_per_statement(&self) -> usize {
        (SQLITE_MAX_VARIABLES / self.columns.len().max(1)).max(1)
    }

    /// `INSERT INTO "table" ("a", "b", ...) ` ready for a VALUES list
    pub fn insert_prefix(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| format!("\"{}\"", c.name)).collect();
        format!("INSERT INTO \"{}\" ({}) ", self.table, names.join(", "))
    }

    pub fn headers(&self) -> impl Iterator<Item = &'static str> {
        self.columns.iter().map(|c| c.header)
    }
}

/// A typed field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Date(NaiveDate),
}

/// One parsed record, values in layout column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    kind: RecordKind,
    values: Vec<Value>,
}

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Look up a value by destination column name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.kind
            .layout()
            .columns
            .iter()
            .position(|c| c.name == column)
            .and_then(|i| self.values.get(i))
    }
}

/// Lazy, finite, non-restartable sequence of rows from one record source
///
/// Rows are read one at a time from the underlying reader. The first error
/// ends the sequence.
pub struct RecordReader<R: Read> {
    reader: csv::Reader<R>,
    kind: RecordKind,
    path: PathBuf,
    /// Source field index for each layout column
    positions: Vec<usize>,
    record: csv::StringRecord,
    rows_read: u64,
    finished: bool,
}

impl RecordReader<File> {
    /// Open a record source file and validate its header
    pub fn open(path: &Path, kind: RecordKind) -> Result<Self, ParseError> {
        if !path.is_file() {
            return Err(ParseError::MissingSource {
                path: path.to_path_buf(),
            });
        }

        let reader = builder().from_path(path).map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Self::with_reader(reader, path.to_path_buf(), kind)
    }
}

impl<R: Read> RecordReader<R> {
    /// Read rows from any byte source; `label` is used in error messages
    pub fn from_reader(rdr: R, label: impl Into<PathBuf>, kind: RecordKind) -> Result<Self, ParseError> {
        Self::with_reader(builder().from_reader(rdr), label.into(), kind)
    }

    fn with_reader(
        mut reader: csv::Reader<R>,
        path: PathBuf,
        kind: RecordKind,
    ) -> Result<Self, ParseError> {
        let headers = reader
            .headers()
            .map_err(|source| ParseError::Header {
                path: path.clone(),
                source,
            })?
            .clone();

        let positions = resolve_columns(&headers, kind.layout(), &path)?;

        Ok(Self {
            reader,
            kind,
            path,
            positions,
            record: csv::StringRecord::new(),
            rows_read: 0,
            finished: false,
        })
    }

    /// Data rows successfully read so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn convert(&self, row: u64) -> Result<Row, ParseError> {
        let layout = self.kind.layout();
        let mut values = Vec::with_capacity(layout.columns.len());

        for (spec, &position) in layout.columns.iter().zip(&self.positions) {
            let field = self.record.get(position).unwrap_or("");
            let raw = field.trim();
            if raw.is_empty() {
                return Err(ParseError::MissingValue {
                    path: self.path.clone(),
                    row,
                    column: spec.header,
                });
            }

            let value = match spec.ty {
                ColumnType::Text => Value::Text(field.to_string()),
                ColumnType::Integer => raw
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| self.invalid(row, spec, raw, e.to_string()))?,
                ColumnType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                    .map(Value::Date)
                    .map_err(|e| self.invalid(row, spec, raw, e.to_string()))?,
            };
            values.push(value);
        }

        Ok(Row {
            kind: self.kind,
            values,
        })
    }

    fn invalid(&self, row: u64, spec: &ColumnSpec, raw: &str, reason: String) -> ParseError {
        ParseError::InvalidField {
            path: self.path.clone(),
            row,
            column: spec.header,
            value: raw.to_string(),
            reason,
        }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Row, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let row = self.rows_read + 1;
        let result = match self.reader.read_record(&mut self.record) {
            Ok(false) => {
                self.finished = true;
                return None;
            },
            Ok(true) => self.convert(row),
            Err(source) => Err(ParseError::Read {
                path: self.path.clone(),
                row,
                source,
            }),
        };

        match result {
            Ok(parsed) => {
                self.rows_read = row;
                Some(Ok(parsed))
            },
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            },
        }
    }
}

fn builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    // Short rows are reported per column as missing values instead of a
    // generic length mismatch.
    builder.has_headers(true).flexible(true);
    builder
}

/// Map each layout column to its position in the header, by exact name
fn resolve_columns(
    headers: &csv::StringRecord,
    layout: &TableLayout,
    path: &Path,
) -> Result<Vec<usize>, ParseError> {
    layout
        .columns
        .iter()
        .map(|spec| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}') == spec.header)
                .ok_or_else(|| ParseError::MissingColumn {
                    path: path.to_path_buf(),
                    column: spec.header,
                })
        })
        .collect()
}
