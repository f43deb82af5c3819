//! The basic example: create, query, bind, append and export

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

use litesession_client::{Engine, EngineConfig, QueryResult, Session, Value};

// starts over when a database file already holds the table
const SETUP_SCRIPT: &str = "DROP TABLE IF EXISTS test; \
     CREATE TABLE test (id INTEGER, name VARCHAR); \
     INSERT INTO test VALUES (1, 'Alice'), (2, 'Bob'), (3, 'Charlie');";

const SELECT_ALL: &str = "SELECT * FROM test ORDER BY id";

/// Settings taken from the command line
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub config: EngineConfig,
    pub export_path: PathBuf,
    pub delimiter: char,
    pub keep_export: bool,
}

pub fn run_basic_example(out: &mut impl Write, options: &DemoOptions) -> Result<()> {
    writeln!(out, "\n=== Basic Example ===")?;

    let engine = Engine::open(options.config.clone()).context("Failed to open database")?;
    let session = engine.connect().context("Failed to connect to database")?;

    run_setup(&session)?;

    let result = select_all(&session)?;
    writeln!(out, "Columns: [{}]", result.column_names().join(", "))?;
    print_rows(out, "Results:", &result)?;

    writeln!(out, "\nUsing prepared statements:")?;
    let mut stmt = session
        .prepare_sql("SELECT * FROM test WHERE id = ?")
        .context("Failed to prepare statement")?;
    stmt.bind(1, 2).context("Failed to bind parameter")?;
    let found = stmt
        .execute()
        .and_then(|cursor| cursor.materialize())
        .context("Failed to execute prepared statement")?;
    match found.first() {
        Some(row) => writeln!(
            out,
            "  Found: ID={}, Name={}",
            field(&row, "id"),
            field(&row, "name")
        )?,
        None => writeln!(out, "  No results found.")?,
    }
    drop(stmt);

    writeln!(out, "\nAppending data:")?;
    let mut appender = session
        .appender(None, "test")
        .context("Failed to create appender")?;
    appender.append(4)?;
    appender.append("Dave")?;
    appender.end_row()?;
    let flushed = appender.flush().context("Failed to flush appender")?;
    appender.close()?;
    writeln!(out, "  Appended {} row(s)", flushed)?;

    print_rows(out, "Updated results:", &select_all(&session)?)?;

    let exported = export(&session, options)?;
    debug!("Exported {} rows", exported);
    writeln!(out, "\nData exported to {}", options.export_path.display())?;

    if !options.keep_export {
        if let Err(e) = fs::remove_file(&options.export_path) {
            warn!(
                "Failed to remove {}: {}",
                options.export_path.display(),
                e
            );
        }
    }

    session.disconnect()?;
    engine.close()?;
    Ok(())
}

/// Create the table through the extract, prepare and pending-execution steps
fn run_setup(session: &Session<'_>) -> Result<()> {
    let statements = session
        .extract(SETUP_SCRIPT)
        .context("No statements extracted from query")?;
    for statement in &statements {
        let mut prepared = session
            .prepare(statement)
            .context("Failed to prepare statement")?;
        let pending = prepared
            .execute_async()
            .context("Failed to create pending result")?;
        pending.wait().context("Failed to execute statement")?;
    }
    Ok(())
}

fn select_all(session: &Session<'_>) -> Result<QueryResult> {
    session.query(SELECT_ALL).context("Failed to execute query")
}

fn print_rows(out: &mut impl Write, heading: &str, result: &QueryResult) -> Result<()> {
    writeln!(out, "{}", heading)?;
    for (index, row) in result.rows().iter().enumerate() {
        writeln!(
            out,
            "  Row {}: ID={}, Name={}",
            index,
            field(row, "id"),
            field(row, "name")
        )?;
    }
    Ok(())
}

fn field(row: &litesession_client::Row, column: &str) -> String {
    row.get(column)
        .map(Value::to_string)
        .unwrap_or_else(|| "NULL".to_string())
}

fn export(session: &Session<'_>, options: &DemoOptions) -> Result<i64> {
    let sql = format!(
        "COPY test TO '{}' (HEADER, DELIMITER '{}')",
        options.export_path.display().to_string().replace('\'', "''"),
        options.delimiter.to_string().replace('\'', "''")
    );
    let result = session.query(&sql).context("Failed to export to CSV")?;
    Ok(result.value(0, 0, 0).and_then(Value::as_i64).unwrap_or(0))
}
