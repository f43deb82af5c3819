//! Bulk loading
//!
//! An [`Appender`] buffers rows for one table and writes a whole batch inside a
//! savepoint, so a batch is stored completely or not at all.

use std::fmt;

use rusqlite::params_from_iter;
use tracing::{debug, warn};

use crate::error::{EngineStatus, Error, Misuse, Result};
use crate::session::Session;
use crate::types::{ColumnInfo, Value};

const SAVEPOINT: &str = "litesession_appender";

/// Buffered row writer for one table
///
/// Values are appended one column at a time in table order; [`Appender::end_row`]
/// completes a row. The buffer is flushed when it reaches the engine's `chunk_size`,
/// on [`Appender::flush`] and on [`Appender::close`]. Dropping an appender flushes
/// whatever complete rows remain, logging a warning if that fails.
pub struct Appender<'s> {
    session: &'s Session<'s>,
    table: String,
    columns: Vec<ColumnInfo>,
    insert_sql: String,
    current: Vec<Value>,
    buffer: Vec<Vec<Value>>,
    batch_size: usize,
    rows_written: u64,
    closed: bool,
}

impl<'s> Appender<'s> {
    pub(crate) fn new(session: &'s Session<'s>, schema: Option<&str>, table: &str) -> Result<Self> {
        let qualified = match schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
            None => quote_ident(table),
        };

        let columns = session.table_columns(&(schema.map(str::to_string), table.to_string()))?;
        if columns.is_empty() {
            return Err(Error::Prepare {
                sql: qualified.clone(),
                status: EngineStatus::new(format!("no such table: {}", qualified)),
            });
        }

        let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified,
            names.join(", "),
            placeholders.join(", ")
        );

        // fail here rather than at the first flush
        session
            .connection()
            .prepare_cached(&insert_sql)
            .map_err(|e| Error::Prepare {
                sql: insert_sql.clone(),
                status: EngineStatus::from(e),
            })?;

        debug!("Appender opened on {} ({} columns)", qualified, columns.len());
        Ok(Self {
            session,
            table: qualified,
            batch_size: session.chunk_size(),
            current: Vec::with_capacity(columns.len()),
            columns,
            insert_sql,
            buffer: Vec::new(),
            rows_written: 0,
            closed: false,
        })
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Complete rows waiting for the next flush
    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    /// Rows stored in the table so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Append the value for the next column of the current row
    pub fn append(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let position = self.current.len() + 1;
        let Some(column) = self.columns.get(self.current.len()) else {
            return Err(Error::Bind {
                position,
                message: format!("row already has all {} values", self.columns.len()),
            });
        };
        if !column.ty.accepts(&value) {
            return Err(Error::Bind {
                position,
                message: format!(
                    "cannot append {} to column {} of type {}",
                    value.type_name(),
                    column.name,
                    column.ty
                ),
            });
        }
        self.current.push(value);
        Ok(())
    }

    /// Finish the current row; flushes when the buffer reaches one chunk
    pub fn end_row(&mut self) -> Result<()> {
        if self.current.len() != self.columns.len() {
            return Err(Misuse::IncompleteRow {
                filled: self.current.len(),
                expected: self.columns.len(),
            }
            .into());
        }
        let row = std::mem::replace(&mut self.current, Vec::with_capacity(self.columns.len()));
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Append a whole row
    ///
    /// A rejected value discards the partially appended row.
    pub fn append_row<I, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for value in values {
            if let Err(e) = self.append(value) {
                self.current.clear();
                return Err(e);
            }
        }
        self.end_row()
    }

    /// Write every buffered row, returning how many were stored
    ///
    /// On failure nothing from the batch is stored and the batch is discarded.
    pub fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let _in_flight = self.session.begin_statement()?;
        let batch = std::mem::take(&mut self.buffer);
        let conn = self.session.connection();

        conn.execute_batch(&format!("SAVEPOINT {}", SAVEPOINT))
            .map_err(|e| Error::Flush(EngineStatus::from(e).to_string()))?;

        let written = (|| -> rusqlite::Result<usize> {
            let mut stmt = conn.prepare_cached(&self.insert_sql)?;
            for row in &batch {
                stmt.execute(params_from_iter(row.iter()))?;
            }
            Ok(batch.len())
        })();

        match written {
            Ok(count) => {
                conn.execute_batch(&format!("RELEASE {}", SAVEPOINT))
                    .map_err(|e| Error::Flush(EngineStatus::from(e).to_string()))?;
                self.rows_written += count as u64;
                debug!("Flushed {} rows into {}", count, self.table);
                Ok(count)
            }
            Err(e) => {
                let status = EngineStatus::from(e);
                if let Err(rollback) = conn.execute_batch(&format!(
                    "ROLLBACK TO {0}; RELEASE {0}",
                    SAVEPOINT
                )) {
                    warn!("Failed to roll back appender batch: {}", rollback);
                }
                debug!("Discarded batch of {} rows for {}", batch.len(), self.table);
                Err(Error::Flush(format!(
                    "{} rows into {} rejected: {}",
                    batch.len(),
                    self.table,
                    status
                )))
            }
        }
    }

    /// Flush and close, returning the total rows written
    ///
    /// Fails if a row was started but not finished.
    pub fn close(mut self) -> Result<u64> {
        if !self.current.is_empty() {
            return Err(Misuse::IncompleteRow {
                filled: self.current.len(),
                expected: self.columns.len(),
            }
            .into());
        }
        self.flush()?;
        self.closed = true;
        Ok(self.rows_written)
    }
}

impl Drop for Appender<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if !self.current.is_empty() {
            warn!(
                "Appender for {} dropped with an unfinished row of {} values",
                self.table,
                self.current.len()
            );
        }
        if let Err(e) = self.flush() {
            warn!("Appender for {} failed to flush on drop: {}", self.table, e);
        }
    }
}

impl fmt::Debug for Appender<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Appender")
            .field("table", &self.table)
            .field("buffered_rows", &self.buffer.len())
            .field("rows_written", &self.rows_written)
            .finish()
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;

    fn count(session: &Session<'_>) -> i64 {
        session
            .query("SELECT count(*) FROM people")
            .unwrap()
            .value(0, 0, 0)
            .and_then(Value::as_i64)
            .unwrap()
    }

    #[test]
    fn test_append_and_flush() {
        let engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let session = engine.connect().unwrap();
        session
            .execute_script("CREATE TABLE people (id INTEGER, name VARCHAR)")
            .unwrap();

        let mut appender = session.appender(None, "people").unwrap();
        appender.append(1).unwrap();
        appender.append("Ann").unwrap();
        appender.end_row().unwrap();
        appender.append_row([Value::Int(2), Value::Null]).unwrap();
        assert_eq!(appender.buffered_rows(), 2);
        assert_eq!(appender.flush().unwrap(), 2);
        assert_eq!(appender.close().unwrap(), 2);

        assert_eq!(count(&session), 2);
    }

    #[test]
    fn test_type_and_shape_checks() {
        let engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let session = engine.connect().unwrap();
        session
            .execute_script("CREATE TABLE people (id INTEGER, name VARCHAR)")
            .unwrap();

        let mut appender = session.appender(Some("main"), "people").unwrap();
        assert!(matches!(
            appender.append("one").unwrap_err(),
            Error::Bind { position: 1, .. }
        ));
        appender.append(1).unwrap();
        assert!(matches!(
            appender.end_row().unwrap_err(),
            Error::ResourceMisuse(Misuse::IncompleteRow {
                filled: 1,
                expected: 2
            })
        ));
        appender.append("Ann").unwrap();
        assert!(matches!(
            appender.append("extra").unwrap_err(),
            Error::Bind { position: 3, .. }
        ));
        appender.end_row().unwrap();

        appender.append(2).unwrap();
        assert!(appender.close().unwrap_err().is_misuse());

        // the complete row was flushed when the appender was dropped
        assert_eq!(count(&session), 1);
    }

    #[test]
    fn test_failed_flush_stores_nothing() {
        let engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let session = engine.connect().unwrap();
        session
            .execute_script("CREATE TABLE people (id INTEGER PRIMARY KEY, name VARCHAR)")
            .unwrap();

        let mut appender = session.appender(None, "people").unwrap();
        appender.append_row([Value::Int(1), Value::from("a")]).unwrap();
        appender.append_row([Value::Int(1), Value::from("dup")]).unwrap();
        assert!(matches!(appender.flush().unwrap_err(), Error::Flush(_)));
        assert_eq!(appender.buffered_rows(), 0);
        drop(appender);

        assert_eq!(count(&session), 0);
    }

    #[test]
    fn test_auto_flush_at_chunk_size() {
        let engine = Engine::open(EngineConfig::in_memory().set("chunk_size", "3")).unwrap();
        let session = engine.connect().unwrap();
        session
            .execute_script("CREATE TABLE people (id INTEGER, name VARCHAR)")
            .unwrap();

        let mut appender = session.appender(None, "people").unwrap();
        for id in 0..4 {
            appender
                .append_row([Value::Int(id), Value::from("x")])
                .unwrap();
        }
        assert_eq!(appender.rows_written(), 3);
        assert_eq!(appender.buffered_rows(), 1);
        assert_eq!(appender.close().unwrap(), 4);
    }

    #[test]
    fn test_unknown_table() {
        let engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let session = engine.connect().unwrap();
        let err = session.appender(None, "ghost").unwrap_err();
        assert!(matches!(err, Error::Prepare { .. }));
    }
}
