//! Prepared statements

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::cursor::ResultCursor;
use crate::error::{EngineStatus, Error, Result};
use crate::export::{CopySpec, CsvSink};
use crate::extract::{StatementKind, StatementRef};
use crate::params::{infer_slots, ParamSlot};
use crate::pending::PendingExecution;
use crate::session::Session;
use crate::types::{ColumnInfo, ColumnType, Value};

/// A statement compiled by the engine, with its parameter slots
///
/// Results and pending executions borrow the statement mutably, so it cannot be
/// rebound or re-executed while one of them is alive.
pub struct PreparedStatement<'s> {
    session: &'s Session<'s>,
    raw: rusqlite::Statement<'s>,
    sql: String,
    columns: Arc<[ColumnInfo]>,
    slots: Vec<ParamSlot>,
    copy: Option<CopySpec>,
}

impl<'s> PreparedStatement<'s> {
    pub(crate) fn new(session: &'s Session<'s>, statement: &StatementRef) -> Result<Self> {
        let (sql, copy) = match statement.kind() {
            StatementKind::Sql => (statement.sql().to_string(), None),
            StatementKind::CopyTo(spec) => (spec.source_sql.clone(), Some(spec.clone())),
        };

        let raw = session
            .connection()
            .prepare(&sql)
            .map_err(|e| prepare_error(&sql, e))?;

        let columns: Arc<[ColumnInfo]> = raw
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), c.decl_type()))
            .collect();

        let slots = infer_slots(&sql, raw.parameter_count(), |table| {
            session.table_columns(table).unwrap_or_else(|e| {
                debug!("Column lookup for {:?} failed: {}", table, e);
                Vec::new()
            })
        })?;

        debug!(
            "Prepared statement with {} columns and {} parameters: {}",
            columns.len(),
            slots.len(),
            sql
        );
        Ok(Self {
            session,
            raw,
            sql,
            columns,
            slots,
            copy,
        })
    }

    /// SQL text handed to the engine
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_copy(&self) -> bool {
        self.copy.is_some()
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.slots.len()
    }

    /// Inferred type of the parameter at 1-based `position`
    pub fn parameter_type(&self, position: usize) -> Option<ColumnType> {
        self.slot(position).map(|s| s.ty)
    }

    /// Name of a named parameter, including its prefix (`:id`)
    pub fn parameter_name(&self, position: usize) -> Option<&str> {
        self.raw.parameter_name(position)
    }

    /// Value currently bound at 1-based `position`
    pub fn bound_value(&self, position: usize) -> Option<&Value> {
        self.slot(position)?.value.as_ref()
    }

    /// Bind a value to the parameter at 1-based `position`
    ///
    /// A rejected value leaves every binding as it was.
    pub fn bind(&mut self, position: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let count = self.slots.len();
        let slot = position
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .ok_or_else(|| Error::Bind {
                position,
                message: format!(
                    "position out of range, statement has {} parameters",
                    count
                ),
            })?;

        if !slot.ty.accepts(&value) {
            return Err(Error::Bind {
                position,
                message: format!(
                    "cannot bind {} to a {} parameter",
                    value.type_name(),
                    slot.ty
                ),
            });
        }

        self.raw
            .raw_bind_parameter(position, &value)
            .map_err(|e| Error::Bind {
                position,
                message: EngineStatus::from(e).to_string(),
            })?;
        slot.value = Some(value);
        Ok(())
    }

    /// Reset every parameter to unbound (NULL)
    pub fn clear_bindings(&mut self) {
        self.raw.clear_bindings();
        for slot in &mut self.slots {
            slot.value = None;
        }
    }

    /// Start executing; the engine is stepped by [`PendingExecution::poll`]
    pub fn execute_async(&mut self) -> Result<PendingExecution<'_>> {
        let session = self.session;
        let in_flight = session.begin_statement()?;

        let changes_before = if self.columns.is_empty() {
            Some(session.total_changes()?)
        } else {
            None
        };
        let sink = match &self.copy {
            Some(spec) => Some(CsvSink::create(spec, &self.columns)?),
            None => None,
        };

        debug!("Executing: {}", self.sql);
        let rows = self.raw.raw_query();
        Ok(PendingExecution::new(
            session,
            rows,
            Arc::clone(&self.columns),
            sink,
            changes_before,
            in_flight,
        ))
    }

    /// Execute to completion
    pub fn execute(&mut self) -> Result<ResultCursor<'_>> {
        self.execute_async()?.wait()
    }

    /// Execute lazily: the engine is stepped as chunks are read from the cursor
    ///
    /// Statements without result columns and `COPY` run to completion immediately.
    pub fn query(&mut self) -> Result<ResultCursor<'_>> {
        if self.copy.is_some() || self.columns.is_empty() {
            return self.execute();
        }

        let in_flight = self.session.begin_statement()?;
        let chunk_size = self.session.chunk_size();
        debug!("Streaming: {}", self.sql);
        let rows = self.raw.raw_query();
        Ok(ResultCursor::streaming(
            Arc::clone(&self.columns),
            rows,
            chunk_size,
            in_flight,
        ))
    }

    /// Finalize the engine statement
    pub fn close(self) -> Result<()> {
        self.raw
            .finalize()
            .map_err(|e| Error::Execution(EngineStatus::from(e)))
    }

    fn slot(&self, position: usize) -> Option<&ParamSlot> {
        self.slots.get(position.checked_sub(1)?)
    }
}

impl fmt::Debug for PreparedStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.sql)
            .field("parameters", &self.slots)
            .field("copy", &self.copy)
            .finish()
    }
}

fn prepare_error(sql: &str, err: rusqlite::Error) -> Error {
    let status = EngineStatus::from(err);
    let message = status.message.as_str();
    let syntax = message.contains("syntax error")
        || message.starts_with("near \"")
        || message.starts_with("unrecognized token")
        || message.starts_with("incomplete input");
    if syntax {
        Error::Parse(status.to_string())
    } else {
        Error::Prepare {
            sql: sql.to_string(),
            status,
        }
    }
}
