//! Sessions
//!
//! A [`Session`] is one engine connection opened from an [`Engine`]. Statements on a
//! session run one at a time: while a result cursor or pending execution is alive, any
//! other execution on the same session is rejected with
//! [`Misuse::ResultNotConsumed`] rather than queued.

use std::cell::Cell;
use std::fmt;
use std::path::Path;

use rusqlite::{Connection, InterruptHandle};
use tracing::{debug, info, instrument};

use crate::appender::Appender;
use crate::cursor::QueryResult;
use crate::engine::Engine;
use crate::error::{EngineStatus, Error, Misuse, Result};
use crate::export::{source_query, CopySpec, CsvOptions};
use crate::extract::{extract_statements, ExtractedStatements, StatementRef};
use crate::params::TableName;
use crate::statement::PreparedStatement;
use crate::types::{ColumnInfo, Value};

/// One connection to an [`Engine`]
///
/// Sessions borrow their engine, so the engine cannot be closed while any session
/// is connected. A session may be moved to another thread but not shared.
pub struct Session<'e> {
    engine: &'e Engine,
    id: u64,
    conn: Connection,
    in_flight: Cell<bool>,
    _registration: Registration<'e>,
}

/// Keeps the engine's session count in step with live sessions
struct Registration<'e> {
    engine: &'e Engine,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.engine.release_session();
    }
}

/// Marks a session as busy for as long as it lives
pub(crate) struct InFlight<'s> {
    flag: &'s Cell<bool>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Interrupts whatever the session is executing, from any thread
///
/// The interrupted execution fails with [`Error::Interrupted`].
pub struct CancelHandle {
    inner: InterruptHandle,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.inner.interrupt();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle")
    }
}

impl<'e> Session<'e> {
    #[instrument(skip(engine), fields(database = %engine.location()))]
    pub(crate) fn connect(engine: &'e Engine) -> Result<Self> {
        let conn = engine.open_session_connection()?;
        let id = engine.register_session();
        info!("Session {} connected", id);
        Ok(Self {
            engine,
            id,
            conn,
            in_flight: Cell::new(false),
            _registration: Registration { engine },
        })
    }

    /// Identifier unique within the engine
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// Whether a result or pending execution is holding the session
    pub fn is_busy(&self) -> bool {
        self.in_flight.get()
    }

    /// Split SQL text into statements
    pub fn extract(&self, sql: &str) -> Result<ExtractedStatements> {
        let statements = extract_statements(sql)?;
        debug!("Extracted {} statements", statements.len());
        Ok(statements)
    }

    /// Prepare one extracted statement
    pub fn prepare(&self, statement: &StatementRef) -> Result<PreparedStatement<'_>> {
        PreparedStatement::new(self, statement)
    }

    /// Extract and prepare SQL text holding exactly one statement
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use litesession_client::{Engine, EngineConfig};
    /// # fn main() -> litesession_client::Result<()> {
    /// let engine = Engine::open(EngineConfig::in_memory())?;
    /// let session = engine.connect()?;
    /// let mut stmt = session.prepare_sql("SELECT ? + 1")?;
    /// stmt.bind(1, 41)?;
    /// let result = stmt.execute()?.materialize()?;
    /// assert_eq!(result.value(0, 0, 0).and_then(|v| v.as_i64()), Some(42));
    /// # Ok(())
    /// # }
    /// ```
    pub fn prepare_sql(&self, sql: &str) -> Result<PreparedStatement<'_>> {
        let statements = self.extract(sql)?;
        if statements.len() != 1 {
            return Err(Error::Parse(format!(
                "expected 1 statement, got {}",
                statements.len()
            )));
        }
        match statements.get(0) {
            Some(statement) => self.prepare(statement),
            None => Err(Error::Parse("expected 1 statement, got 0".to_string())),
        }
    }

    /// Run every statement in `sql` in order, returning the total rows changed
    pub fn execute_script(&self, sql: &str) -> Result<u64> {
        let mut changed = 0;
        for statement in &self.extract(sql)? {
            let mut prepared = self.prepare(statement)?;
            let cursor = prepared.execute()?;
            changed += cursor.rows_changed();
        }
        Ok(changed)
    }

    /// Run a single statement and collect its whole result
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        let mut statement = self.prepare_sql(sql)?;
        let result = statement.execute()?.materialize();
        result
    }

    /// Open a bulk loader on `table`
    pub fn appender(&self, schema: Option<&str>, table: &str) -> Result<Appender<'_>> {
        Appender::new(self, schema, table)
    }

    /// Export a table or a parenthesized query to a CSV file
    ///
    /// Returns the number of data rows written.
    pub fn export_csv(
        &self,
        source: &str,
        path: impl AsRef<Path>,
        options: CsvOptions,
    ) -> Result<u64> {
        let spec = CopySpec {
            source_sql: source_query(source)?,
            path: path.as_ref().to_path_buf(),
            options,
        };
        let mut statement = self.prepare(&StatementRef::copy(spec))?;
        let result = statement.execute()?.materialize()?;
        Ok(result.value(0, 0, 0).and_then(Value::as_i64).unwrap_or(0) as u64)
    }

    /// Handle for interrupting this session from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            inner: self.conn.get_interrupt_handle(),
        }
    }

    /// Close the session's connection
    pub fn disconnect(self) -> Result<()> {
        let Session {
            id,
            conn,
            _registration,
            ..
        } = self;
        conn.close().map_err(|(_, e)| {
            Error::Connection(format!(
                "failed to close session {}: {}",
                id,
                EngineStatus::from(e)
            ))
        })?;
        info!("Session {} disconnected", id);
        Ok(())
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.engine.chunk_size()
    }

    /// Claim the session for one execution
    pub(crate) fn begin_statement(&self) -> Result<InFlight<'_>> {
        if self.in_flight.replace(true) {
            return Err(Misuse::ResultNotConsumed.into());
        }
        Ok(InFlight {
            flag: &self.in_flight,
        })
    }

    /// Columns of a table in declaration order; empty when the table does not exist
    pub(crate) fn table_columns(&self, table: &TableName) -> Result<Vec<ColumnInfo>> {
        let (schema, name) = table;
        let mut stmt = match schema {
            Some(_) => self
                .conn
                .prepare_cached("SELECT name, type FROM pragma_table_info(?1, ?2)"),
            None => self
                .conn
                .prepare_cached("SELECT name, type FROM pragma_table_info(?1)"),
        }
        .map_err(Error::execution)?;

        stmt.raw_bind_parameter(1, name.as_str())
            .map_err(Error::execution)?;
        if let Some(schema) = schema {
            stmt.raw_bind_parameter(2, schema.as_str())
                .map_err(Error::execution)?;
        }

        let mut columns = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next().map_err(Error::execution)? {
            let name: String = row.get(0).map_err(Error::execution)?;
            let decl: Option<String> = row.get(1).map_err(Error::execution)?;
            columns.push(ColumnInfo::new(
                name,
                decl.as_deref().filter(|d| !d.is_empty()),
            ));
        }
        Ok(columns)
    }

    /// Value of the engine's running change counter
    pub(crate) fn total_changes(&self) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT total_changes()")
            .map_err(Error::execution)?;
        let total: i64 = stmt
            .query_row([], |row| row.get(0))
            .map_err(Error::execution)?;
        Ok(total.max(0) as u64)
    }
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::ColumnType;

    #[test]
    fn test_only_one_execution_at_a_time() {
        let engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let session = engine.connect().unwrap();

        let guard = session.begin_statement().unwrap();
        assert!(session.is_busy());
        let err = session.begin_statement().err().unwrap();
        assert!(matches!(
            err,
            Error::ResourceMisuse(Misuse::ResultNotConsumed)
        ));

        drop(guard);
        assert!(!session.is_busy());
        assert!(session.begin_statement().is_ok());
    }

    #[test]
    fn test_prepare_sql_requires_one_statement() {
        let engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let session = engine.connect().unwrap();

        let err = session.prepare_sql("SELECT 1; SELECT 2").err().unwrap();
        assert!(matches!(err, Error::Parse(msg) if msg == "expected 1 statement, got 2"));
    }

    #[test]
    fn test_table_columns() {
        let engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let session = engine.connect().unwrap();
        session
            .execute_script("CREATE TABLE t (id INTEGER, label VARCHAR(8), extra)")
            .unwrap();

        let columns = session.table_columns(&(None, "t".to_string())).unwrap();
        let types: Vec<_> = columns.iter().map(|c| (c.name.as_str(), c.ty)).collect();
        assert_eq!(
            types,
            vec![
                ("id", ColumnType::Integer),
                ("label", ColumnType::Text),
                ("extra", ColumnType::Any),
            ]
        );

        let qualified = session
            .table_columns(&(Some("main".to_string()), "t".to_string()))
            .unwrap();
        assert_eq!(qualified.len(), 3);
        assert!(session
            .table_columns(&(None, "missing".to_string()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_execute_script_counts_changes() {
        let engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let session = engine.connect().unwrap();
        let changed = session
            .execute_script(
                "CREATE TABLE t (id INT); INSERT INTO t VALUES (1), (2); \
                 CREATE INDEX t_id ON t (id); UPDATE t SET id = id + 10;",
            )
            .unwrap();
        assert_eq!(changed, 4);
    }
}
