//! CSV export
//!
//! Backs `COPY <source> TO '<path>' (HEADER, DELIMITER ',')` statements and
//! [`Session::export_csv`](crate::Session::export_csv). Rows are streamed into the
//! writer one chunk at a time while the pending execution is polled.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{Writer, WriterBuilder};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{ColumnInfo, Value};

/// Formatting options for CSV output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    /// Write the column names as the first record
    pub header: bool,
    pub delimiter: u8,
    pub quote: u8,
    /// Text written for SQL NULL
    pub null: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            header: false,
            delimiter: b',',
            quote: b'"',
            null: String::new(),
        }
    }
}

impl CsvOptions {
    /// Header on, comma delimited
    pub fn with_header() -> Self {
        Self {
            header: true,
            ..Self::default()
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// A parsed `COPY ... TO` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySpec {
    /// Query producing the exported rows
    pub source_sql: String,
    pub path: PathBuf,
    pub options: CsvOptions,
}

/// Query for an export source: a table name or a parenthesized query
pub(crate) fn source_query(source: &str) -> Result<String> {
    let source = source.trim();
    if let Some(inner) = source.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        let inner = inner.trim();
        if !inner.is_empty() {
            return Ok(inner.to_string());
        }
    } else if !source.is_empty() {
        return Ok(format!("SELECT * FROM {}", source));
    }
    Err(Error::Parse("export source is empty".to_string()))
}

/// Destination of an export in progress
pub(crate) struct CsvSink {
    writer: Writer<File>,
    options: CsvOptions,
    path: PathBuf,
    rows_written: u64,
}

impl CsvSink {
    pub(crate) fn create(spec: &CopySpec, columns: &[ColumnInfo]) -> Result<Self> {
        let mut writer = WriterBuilder::new()
            .delimiter(spec.options.delimiter)
            .quote(spec.options.quote)
            .from_path(&spec.path)?;

        if spec.options.header {
            writer.write_record(columns.iter().map(|c| c.name.as_str()))?;
        }

        debug!("Exporting CSV to {}", spec.path.display());
        Ok(Self {
            writer,
            options: spec.options.clone(),
            path: spec.path.clone(),
            rows_written: 0,
        })
    }

    pub(crate) fn write_row(&mut self, values: &[Value]) -> Result<()> {
        let null = self.options.null.as_str();
        self.writer.write_record(values.iter().map(|v| match v {
            Value::Null => null.to_string(),
            other => other.to_string(),
        }))?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flush the file and return the number of data rows written
    pub(crate) fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        debug!(
            "Exported {} rows to {}",
            self.rows_written,
            self.path.display()
        );
        Ok(self.rows_written)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
