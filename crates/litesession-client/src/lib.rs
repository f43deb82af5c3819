//! litesession Client Library
//!
//! A session-oriented client for an embedded SQL engine, exposing the engine's
//! low-level surface with safe, owned handles.
//!
//! # Features
//!
//! - **Engine handles and sessions** - Open a database from an option map, connect as many sessions as needed
//! - **Statement pipeline** - Extract, prepare, bind and execute, with type-checked parameters
//! - **Pending executions** - Poll long-running statements one chunk at a time, or cancel them
//! - **Chunked results** - Columnar chunks with fully decoded values and serde row deserialization
//! - **Appender** - Buffered bulk loading, all-or-nothing per batch
//! - **CSV export** - `COPY <table> TO '<path>' (HEADER, DELIMITER ',')`
//!
//! # Quick Start
//!
//! ```no_run
//! use litesession_client::{Engine, EngineConfig, Value};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Person {
//!     id: i64,
//!     name: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::open(EngineConfig::in_memory().set("threads", "1"))?;
//!     let session = engine.connect()?;
//!
//!     session.execute_script(
//!         "CREATE TABLE people (id INTEGER, name VARCHAR);
//!          INSERT INTO people VALUES (1, 'Alice'), (2, 'Bob');",
//!     )?;
//!
//!     // Prepared statements with typed parameters
//!     let mut stmt = session.prepare_sql("SELECT * FROM people WHERE id = ?")?;
//!     stmt.bind(1, 2)?;
//!     let result = stmt.execute()?.materialize()?;
//!     let bob: Person = result.rows()[0].deserialize()?;
//!     println!("{:?}", bob);
//!     drop(stmt);
//!
//!     // Bulk loading
//!     let mut appender = session.appender(None, "people")?;
//!     appender.append_row([Value::Int(3), Value::from("Charlie")])?;
//!     appender.close()?;
//!
//!     // CSV export
//!     session.execute_script("COPY people TO 'people.csv' (HEADER, DELIMITER ',')")?;
//!
//!     session.disconnect()?;
//!     engine.close()?;
//!     Ok(())
//! }
//! ```

pub mod appender;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod export;
pub mod extract;
mod params;
pub mod pending;
pub mod session;
pub mod statement;
pub mod types;

pub use appender::Appender;
pub use config::{AccessMode, EngineConfig, DEFAULT_CHUNK_SIZE, RECOGNIZED_OPTIONS};
pub use cursor::{DataChunk, QueryResult, ResultCursor};
pub use engine::Engine;
pub use error::{EngineStatus, Error, Misuse, Result};
pub use export::{CopySpec, CsvOptions};
pub use extract::{extract_statements, ExtractedStatements, StatementKind, StatementRef};
pub use pending::{ExecutionPoll, PendingExecution};
pub use session::{CancelHandle, Session};
pub use statement::PreparedStatement;
pub use types::{ColumnInfo, ColumnType, Row, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_cross_threads() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Engine>();
        assert_sync::<Engine>();
        assert_send::<Session<'static>>();
        assert_send::<CancelHandle>();
        assert_sync::<CancelHandle>();
    }
}
