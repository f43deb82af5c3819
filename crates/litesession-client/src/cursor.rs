//! Result cursors
//!
//! Query output is delivered in [`DataChunk`]s of at most `chunk_size` rows, stored
//! column by column. A [`ResultCursor`] hands chunks out once, front to back; a
//! [`QueryResult`] is the same output fully materialized.

use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::Rows;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::InFlight;
use crate::types::{ColumnInfo, ColumnType, Row, Value};

/// An immutable block of result rows, stored by column
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    columns: Vec<Vec<Value>>,
    row_count: usize,
}

impl DataChunk {
    pub(crate) fn from_rows(rows: Vec<Vec<Value>>, column_count: usize) -> Self {
        let row_count = rows.len();
        let mut columns: Vec<Vec<Value>> = (0..column_count)
            .map(|_| Vec::with_capacity(row_count))
            .collect();
        for row in rows {
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value);
            }
        }
        Self { columns, row_count }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Value at `column`, `row` within this chunk
    pub fn value(&self, column: usize, row: usize) -> Option<&Value> {
        self.columns.get(column)?.get(row)
    }

    /// All values of one column
    pub fn column(&self, column: usize) -> Option<&[Value]> {
        self.columns.get(column).map(Vec::as_slice)
    }

    /// Values of one row, in column order
    pub fn row(&self, row: usize) -> Option<Vec<Value>> {
        if row >= self.row_count {
            return None;
        }
        Some(self.columns.iter().map(|c| c[row].clone()).collect())
    }
}

/// Rows read by one step of the engine
pub(crate) struct RowBatch {
    pub rows: Vec<Vec<Value>>,
    /// The statement has no more rows
    pub exhausted: bool,
}

/// Step `rows` until `limit` rows are read or the statement is done
pub(crate) fn read_rows(
    rows: &mut Rows<'_>,
    columns: &[ColumnInfo],
    limit: usize,
) -> Result<RowBatch> {
    let mut batch = Vec::with_capacity(limit.min(1024));
    while batch.len() < limit {
        let Some(row) = rows.next().map_err(Error::execution)? else {
            return Ok(RowBatch {
                rows: batch,
                exhausted: true,
            });
        };
        let mut values = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            let raw = row.get_ref(index).map_err(|e| Error::Decode {
                column: index,
                message: e.to_string(),
            })?;
            values.push(Value::decode(raw, column.ty, index)?);
        }
        batch.push(values);
    }
    Ok(RowBatch {
        rows: batch,
        exhausted: false,
    })
}

enum Source<'a> {
    /// Chunks already produced by a pending execution
    Buffered(VecDeque<DataChunk>),
    /// Engine statement stepped as chunks are requested
    Streaming {
        rows: Option<Rows<'a>>,
        chunk_size: usize,
    },
}

/// Column metadata plus the chunks of one execution
///
/// A cursor keeps its session busy until it is dropped.
pub struct ResultCursor<'a> {
    columns: Arc<[ColumnInfo]>,
    source: Source<'a>,
    rows_changed: u64,
    _in_flight: InFlight<'a>,
}

impl<'a> ResultCursor<'a> {
    pub(crate) fn buffered(
        columns: Arc<[ColumnInfo]>,
        chunks: Vec<DataChunk>,
        rows_changed: u64,
        in_flight: InFlight<'a>,
    ) -> Self {
        Self {
            columns,
            source: Source::Buffered(chunks.into()),
            rows_changed,
            _in_flight: in_flight,
        }
    }

    pub(crate) fn streaming(
        columns: Arc<[ColumnInfo]>,
        rows: Rows<'a>,
        chunk_size: usize,
        in_flight: InFlight<'a>,
    ) -> Self {
        Self {
            columns,
            source: Source::Streaming {
                rows: Some(rows),
                chunk_size,
            },
            rows_changed: 0,
            _in_flight: in_flight,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.name.as_str())
    }

    pub fn column_type(&self, index: usize) -> Option<ColumnType> {
        self.columns.get(index).map(|c| c.ty)
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Rows inserted, updated or deleted by a statement without result columns
    pub fn rows_changed(&self) -> u64 {
        self.rows_changed
    }

    /// Next chunk of rows, or `None` once the result is exhausted
    pub fn next_chunk(&mut self) -> Result<Option<DataChunk>> {
        match &mut self.source {
            Source::Buffered(chunks) => Ok(chunks.pop_front()),
            Source::Streaming { rows, chunk_size } => {
                let Some(active) = rows.as_mut() else {
                    return Ok(None);
                };
                let batch = match read_rows(active, &self.columns, *chunk_size) {
                    Ok(batch) => batch,
                    Err(e) => {
                        *rows = None;
                        return Err(e);
                    }
                };
                if batch.exhausted {
                    // resets the engine statement
                    *rows = None;
                }
                if batch.rows.is_empty() {
                    return Ok(None);
                }
                debug!("Streamed chunk of {} rows", batch.rows.len());
                Ok(Some(DataChunk::from_rows(batch.rows, self.columns.len())))
            }
        }
    }

    /// Read every remaining chunk
    pub fn materialize(mut self) -> Result<QueryResult> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            chunks.push(chunk);
        }
        Ok(QueryResult::new(
            Arc::clone(&self.columns),
            chunks,
            self.rows_changed,
        ))
    }
}

impl Iterator for ResultCursor<'_> {
    type Item = Result<DataChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl std::fmt::Debug for ResultCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("columns", &self.columns)
            .field("rows_changed", &self.rows_changed)
            .finish()
    }
}

/// Fully materialized output of one statement
#[derive(Debug, Clone)]
pub struct QueryResult {
    columns: Arc<[ColumnInfo]>,
    names: Arc<[String]>,
    chunks: Vec<DataChunk>,
    rows_changed: u64,
}

impl QueryResult {
    fn new(columns: Arc<[ColumnInfo]>, chunks: Vec<DataChunk>, rows_changed: u64) -> Self {
        let names = columns.iter().map(|c| c.name.clone()).collect();
        Self {
            columns,
            names,
            chunks,
            rows_changed,
        }
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Column names in result order
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[DataChunk] {
        &self.chunks
    }

    /// Rows in chunk `chunk`; zero when the chunk does not exist
    pub fn rows_in_chunk(&self, chunk: usize) -> usize {
        self.chunks.get(chunk).map_or(0, DataChunk::row_count)
    }

    /// Total rows across all chunks
    pub fn row_count(&self) -> usize {
        self.chunks.iter().map(DataChunk::row_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn rows_changed(&self) -> u64 {
        self.rows_changed
    }

    pub fn value(&self, chunk: usize, column: usize, row: usize) -> Option<&Value> {
        self.chunks.get(chunk)?.value(column, row)
    }

    /// All rows, in order
    pub fn rows(&self) -> Vec<Row> {
        self.chunks
            .iter()
            .flat_map(|chunk| (0..chunk.row_count()).filter_map(move |r| chunk.row(r)))
            .map(|values| Row::new(Arc::clone(&self.names), values))
            .collect()
    }

    /// First row, if any
    pub fn first(&self) -> Option<Row> {
        let chunk = self.chunks.iter().find(|c| !c.is_empty())?;
        chunk
            .row(0)
            .map(|values| Row::new(Arc::clone(&self.names), values))
    }
}
