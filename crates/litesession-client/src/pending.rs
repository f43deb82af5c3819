//! Pending executions
//!
//! A [`PendingExecution`] steps the engine one task at a time. Each call to
//! [`PendingExecution::poll`] reads at most one chunk of rows, so a caller can
//! interleave other work with a long-running statement or give up on it with
//! [`PendingExecution::cancel`].

use std::fmt;
use std::sync::Arc;

use rusqlite::Rows;
use tracing::{debug, warn};

use crate::cursor::{read_rows, DataChunk, ResultCursor};
use crate::error::{Misuse, Result};
use crate::export::CsvSink;
use crate::session::{InFlight, Session};
use crate::types::{ColumnInfo, Value};

/// Outcome of one [`PendingExecution::poll`]
pub enum ExecutionPoll<'a> {
    /// More work remains
    Running,
    /// Execution finished; the cursor holds every produced chunk
    Ready(ResultCursor<'a>),
}

impl ExecutionPoll<'_> {
    pub fn is_ready(&self) -> bool {
        matches!(self, ExecutionPoll::Ready(_))
    }
}

impl fmt::Debug for ExecutionPoll<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPoll::Running => f.write_str("Running"),
            ExecutionPoll::Ready(cursor) => f.debug_tuple("Ready").field(cursor).finish(),
        }
    }
}

/// A statement execution in progress
pub struct PendingExecution<'a> {
    session: &'a Session<'a>,
    rows: Option<Rows<'a>>,
    columns: Arc<[ColumnInfo]>,
    chunk_size: usize,
    chunks: Vec<DataChunk>,
    sink: Option<CsvSink>,
    changes_before: Option<u64>,
    rows_processed: u64,
    in_flight: Option<InFlight<'a>>,
}

impl<'a> PendingExecution<'a> {
    pub(crate) fn new(
        session: &'a Session<'a>,
        rows: Rows<'a>,
        columns: Arc<[ColumnInfo]>,
        sink: Option<CsvSink>,
        changes_before: Option<u64>,
        in_flight: InFlight<'a>,
    ) -> Self {
        Self {
            session,
            rows: Some(rows),
            columns,
            chunk_size: session.chunk_size(),
            chunks: Vec::new(),
            sink,
            changes_before,
            rows_processed: 0,
            in_flight: Some(in_flight),
        }
    }

    /// Perform one task: read up to one chunk of rows
    ///
    /// Fails with [`Misuse::AlreadyCompleted`] once the execution has produced its
    /// result or failed.
    pub fn poll(&mut self) -> Result<ExecutionPoll<'a>> {
        let Some(rows) = self.rows.as_mut() else {
            return Err(Misuse::AlreadyCompleted.into());
        };

        let batch = match read_rows(rows, &self.columns, self.chunk_size) {
            Ok(batch) => batch,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };
        self.rows_processed += batch.rows.len() as u64;

        let stored = match self.sink.as_mut() {
            Some(sink) => batch.rows.iter().try_for_each(|row| sink.write_row(row)),
            None => {
                if !batch.rows.is_empty() {
                    self.chunks
                        .push(DataChunk::from_rows(batch.rows, self.columns.len()));
                }
                Ok(())
            }
        };
        if let Err(e) = stored {
            self.fail();
            return Err(e);
        }

        if !batch.exhausted {
            debug!("Processed {} rows so far", self.rows_processed);
            return Ok(ExecutionPoll::Running);
        }

        // resets the engine statement
        self.rows = None;
        match self.complete() {
            Ok(cursor) => Ok(ExecutionPoll::Ready(cursor)),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Poll until the execution is ready
    pub fn wait(mut self) -> Result<ResultCursor<'a>> {
        loop {
            if let ExecutionPoll::Ready(cursor) = self.poll()? {
                return Ok(cursor);
            }
        }
    }

    /// Abandon the execution and release the session
    pub fn cancel(mut self) {
        self.rows = None;
        self.discard_export();
        debug!("Cancelled after {} rows", self.rows_processed);
    }

    /// Whether more polls are needed
    pub fn is_running(&self) -> bool {
        self.rows.is_some()
    }

    /// Rows read from the engine so far
    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    fn complete(&mut self) -> Result<ResultCursor<'a>> {
        let in_flight = self.in_flight.take().ok_or(Misuse::AlreadyCompleted)?;

        if let Some(sink) = self.sink.take() {
            let exported = sink.finish()?;
            let columns: Arc<[ColumnInfo]> = vec![ColumnInfo::new("Count", Some("BIGINT"))].into();
            let chunk = DataChunk::from_rows(vec![vec![Value::Int(exported as i64)]], 1);
            return Ok(ResultCursor::buffered(columns, vec![chunk], 0, in_flight));
        }

        let rows_changed = match self.changes_before {
            Some(before) => self.session.total_changes()?.saturating_sub(before),
            None => 0,
        };
        debug!(
            "Execution finished: {} chunks, {} rows changed",
            self.chunks.len(),
            rows_changed
        );
        Ok(ResultCursor::buffered(
            Arc::clone(&self.columns),
            std::mem::take(&mut self.chunks),
            rows_changed,
            in_flight,
        ))
    }

    fn fail(&mut self) {
        self.rows = None;
        self.discard_export();
        self.chunks.clear();
        self.in_flight = None;
    }

    /// Close and delete a partially written export file
    fn discard_export(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        let path = sink.path().to_path_buf();
        drop(sink);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to remove partial export {}: {}", path.display(), e);
        }
    }
}

impl fmt::Debug for PendingExecution<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExecution")
            .field("running", &self.is_running())
            .field("rows_processed", &self.rows_processed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::error::Error;

    #[test]
    fn test_polls_once_per_chunk() {
        let engine = Engine::open(EngineConfig::in_memory().set("chunk_size", "10")).unwrap();
        let session = engine.connect().unwrap();
        let mut stmt = session
            .prepare_sql(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 25) \
                 SELECT x FROM n",
            )
            .unwrap();

        let mut pending = stmt.execute_async().unwrap();
        assert!(matches!(pending.poll().unwrap(), ExecutionPoll::Running));
        assert_eq!(pending.rows_processed(), 10);
        assert!(matches!(pending.poll().unwrap(), ExecutionPoll::Running));

        let cursor = match pending.poll().unwrap() {
            ExecutionPoll::Ready(cursor) => cursor,
            ExecutionPoll::Running => panic!("expected the third poll to finish"),
        };
        let result = cursor.materialize().unwrap();
        assert_eq!(result.chunk_count(), 3);
        assert_eq!(result.rows_in_chunk(2), 5);
        assert_eq!(result.value(2, 0, 4), Some(&Value::Int(25)));

        let err = pending.poll().unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceMisuse(Misuse::AlreadyCompleted)
        ));
    }

    #[test]
    fn test_cancel_releases_session() {
        let engine = Engine::open(EngineConfig::in_memory().set("chunk_size", "1")).unwrap();
        let session = engine.connect().unwrap();
        let mut stmt = session.prepare_sql("SELECT 1 UNION ALL SELECT 2").unwrap();

        let mut pending = stmt.execute_async().unwrap();
        assert!(!pending.poll().unwrap().is_ready());
        assert!(session.is_busy());
        pending.cancel();
        assert!(!session.is_busy());

        let result = stmt.execute().unwrap().materialize().unwrap();
        assert_eq!(result.row_count(), 2);
    }

    #[test]
    fn test_failed_export_removes_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("partial.csv");

        let engine = Engine::open(EngineConfig::in_memory().set("chunk_size", "1")).unwrap();
        let session = engine.connect().unwrap();
        // the third row overflows abs()
        let sql = format!(
            "COPY (WITH RECURSIVE s(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM s WHERE x < 3) \
             SELECT CASE WHEN x < 3 THEN x ELSE abs(x - 9223372036854775807 - 4) END FROM s) \
             TO '{}' (HEADER)",
            path.display()
        );
        let mut stmt = session.prepare_sql(&sql).unwrap();

        let mut pending = stmt.execute_async().unwrap();
        assert!(!pending.poll().unwrap().is_ready());
        assert!(path.exists());

        let err = loop {
            match pending.poll() {
                Ok(ExecutionPoll::Running) => continue,
                Ok(ExecutionPoll::Ready(_)) => panic!("overflowing export finished"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, Error::Execution(_)), "{:?}", err);
        assert!(!path.exists());
        assert!(!session.is_busy());
    }
}
