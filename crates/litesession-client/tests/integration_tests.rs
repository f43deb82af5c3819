//! Integration tests for litesession-client
//!
//! Every test opens its own private in-memory engine, so they can run in parallel.

use litesession_client::{
    ColumnType, CsvOptions, Engine, EngineConfig, Error, ExecutionPoll, Misuse, Result, Value,
};
use serde::Deserialize;
use tempfile::TempDir;

const SETUP: &str = "CREATE TABLE t(id INT, name TEXT); \
                     INSERT INTO t VALUES (1,'Alice'),(2,'Bob'),(3,'Charlie');";

fn open() -> Engine {
    Engine::open(EngineConfig::in_memory()).expect("in-memory engine")
}

#[test]
fn test_open_with_recognized_options() -> Result<()> {
    let engine = Engine::open(EngineConfig::in_memory().with_options([
        ("threads", "2"),
        ("cache_size", "-2000"),
        ("temp_store", "memory"),
        ("chunk_size", "128"),
    ]))?;
    assert_eq!(engine.chunk_size(), 128);
    engine.close()
}

#[test]
fn test_unknown_option_rejected() {
    let err = Engine::open(EngineConfig::in_memory().set("max_widgets", "3")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_file_database_persists() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("people.db");

    let engine = Engine::open(EngineConfig::file(&path).set("synchronous", "normal"))?;
    let session = engine.connect()?;
    session.execute_script(SETUP)?;
    session.disconnect()?;
    engine.close()?;

    let engine = Engine::open(EngineConfig::file(&path).set("access_mode", "read_only"))?;
    let session = engine.connect()?;
    let result = session.query("SELECT count(*) FROM t")?;
    assert_eq!(result.value(0, 0, 0), Some(&Value::Int(3)));

    let err = session.execute_script("INSERT INTO t VALUES (4, 'Dave')").unwrap_err();
    assert!(
        matches!(err, Error::Execution(_) | Error::Prepare { .. }),
        "{:?}",
        err
    );
    Ok(())
}

#[test]
fn test_statement_counts() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;

    assert_eq!(session.extract("SELECT 1")?.len(), 1);
    assert_eq!(session.extract("SELECT 1; SELECT 2; SELECT 3;")?.len(), 3);
    assert!(matches!(session.extract("   ").unwrap_err(), Error::Parse(_)));
    assert!(matches!(session.extract("").unwrap_err(), Error::Parse(_)));
    Ok(())
}

#[test]
fn test_query_after_setup() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let mut stmt = session.prepare_sql("SELECT * FROM t ORDER BY id")?;
    let cursor = stmt.execute()?;
    assert_eq!(cursor.column_count(), 2);
    assert_eq!(cursor.column_name(0), Some("id"));
    assert_eq!(cursor.column_name(1), Some("name"));
    assert_eq!(cursor.column_type(0), Some(ColumnType::Integer));
    assert_eq!(cursor.column_type(1), Some(ColumnType::Text));

    let result = cursor.materialize()?;
    assert_eq!(result.row_count(), 3);
    assert_eq!(result.value(0, 0, 0), Some(&Value::Int(1)));
    assert_eq!(result.value(0, 1, 0), Some(&Value::Text("Alice".to_string())));
    Ok(())
}

#[test]
fn test_typed_rows() -> Result<()> {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        id: i64,
        name: Option<String>,
    }

    let engine = open();
    let session = engine.connect()?;
    session.execute_script(SETUP)?;
    session.execute_script("INSERT INTO t VALUES (4, NULL)")?;

    let people: Vec<Person> = session
        .query("SELECT id, name FROM t ORDER BY id")?
        .rows()
        .iter()
        .map(|row| row.deserialize())
        .collect::<Result<_>>()?;
    assert_eq!(people.len(), 4);
    assert_eq!(
        people[3],
        Person {
            id: 4,
            name: None
        }
    );
    Ok(())
}

#[test]
fn test_bind_mismatch_keeps_other_bindings() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let mut stmt = session.prepare_sql("SELECT name FROM t WHERE id = ? OR name = ?")?;
    stmt.bind(1, 1)?;
    stmt.bind(2, "Bob")?;

    let err = stmt.bind(1, "not a number").unwrap_err();
    assert!(matches!(err, Error::Bind { position: 1, .. }));
    assert_eq!(stmt.bound_value(1), Some(&Value::Int(1)));
    assert_eq!(stmt.bound_value(2), Some(&Value::Text("Bob".to_string())));

    let result = stmt.execute()?.materialize()?;
    assert_eq!(result.row_count(), 2);
    Ok(())
}

#[test]
fn test_rebinding_and_reexecuting() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let mut stmt = session.prepare_sql("SELECT name FROM t WHERE id = ?")?;
    for (id, expected) in [(1, "Alice"), (3, "Charlie")] {
        stmt.bind(1, id)?;
        let result = stmt.execute()?.materialize()?;
        assert_eq!(result.value(0, 0, 0).and_then(Value::as_str), Some(expected));
    }
    stmt.close()
}

#[test]
fn test_appender_then_requery() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let mut appender = session.appender(None, "t")?;
    appender.append(4)?;
    appender.append("Dave")?;
    appender.end_row()?;
    assert_eq!(appender.flush()?, 1);
    appender.close()?;

    let result = session.query("SELECT * FROM t ORDER BY id")?;
    assert_eq!(result.row_count(), 4);
    let rows = result.rows();
    assert_eq!(rows[3].get("id"), Some(&Value::Int(4)));
    assert_eq!(rows[3].get("name"), Some(&Value::Text("Dave".to_string())));
    Ok(())
}

#[test]
fn test_copy_to_csv_with_header() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.csv");

    let engine = open();
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let sql = format!(
        "COPY t TO '{}' (HEADER, DELIMITER ',')",
        path.display()
    );
    let result = session.query(&sql)?;
    assert_eq!(result.column_names(), ["Count".to_string()]);
    assert_eq!(result.value(0, 0, 0), Some(&Value::Int(3)));

    let csv = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "id,name");
    assert_eq!(lines[1], "1,Alice");
    Ok(())
}

#[test]
fn test_export_csv_formats_values() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("values.csv");

    let engine = open();
    let session = engine.connect()?;
    session.execute_script(
        "CREATE TABLE v (flag BOOLEAN, data BLOB, note TEXT);
         INSERT INTO v VALUES (1, x'00ff', NULL), (0, NULL, 'a,b');",
    )?;

    let options = CsvOptions {
        null: "NULL".to_string(),
        ..CsvOptions::with_header()
    };
    let exported = session.export_csv("(SELECT * FROM v ORDER BY flag DESC)", &path, options)?;
    assert_eq!(exported, 2);

    let csv = std::fs::read_to_string(&path)?;
    assert_eq!(csv, "flag,data,note\ntrue,00ff,NULL\nfalse,NULL,\"a,b\"\n");
    Ok(())
}

#[test]
fn test_copy_from_is_rejected() {
    let engine = open();
    let session = engine.connect().unwrap();
    let err = session.extract("COPY t FROM 'in.csv'").unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
}

#[test]
fn test_second_execution_while_result_alive() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let mut first = session.prepare_sql("SELECT * FROM t")?;
    let mut second = session.prepare_sql("SELECT count(*) FROM t")?;

    let cursor = first.query()?;
    let err = second.execute().unwrap_err();
    assert!(matches!(
        err,
        Error::ResourceMisuse(Misuse::ResultNotConsumed)
    ));
    let err = session.query("SELECT 1").unwrap_err();
    assert!(err.is_misuse());

    drop(cursor);
    assert_eq!(second.execute()?.materialize()?.value(0, 0, 0), Some(&Value::Int(3)));
    Ok(())
}

#[test]
fn test_streaming_query_reads_lazily() -> Result<()> {
    let engine = Engine::open(EngineConfig::in_memory().set("chunk_size", "2"))?;
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let mut stmt = session.prepare_sql("SELECT id FROM t ORDER BY id")?;
    let mut cursor = stmt.query()?;
    let first = cursor.next_chunk()?.expect("first chunk");
    assert_eq!(first.row_count(), 2);
    let rest: Vec<_> = cursor.by_ref().collect::<Result<_>>()?;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].value(0, 0), Some(&Value::Int(3)));
    assert!(cursor.next_chunk()?.is_none());
    Ok(())
}

#[test]
fn test_pending_execution_polls_per_chunk() -> Result<()> {
    let engine = Engine::open(EngineConfig::in_memory().set("chunk_size", "4"))?;
    let session = engine.connect()?;
    session.execute_script(
        "CREATE TABLE n (x INTEGER);
         WITH RECURSIVE s(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM s WHERE x < 10)
         INSERT INTO n SELECT x FROM s;",
    )?;

    let mut stmt = session.prepare_sql("SELECT x FROM n ORDER BY x")?;
    let mut pending = stmt.execute_async()?;
    let mut polls = 0;
    let cursor = loop {
        polls += 1;
        match pending.poll()? {
            ExecutionPoll::Running => continue,
            ExecutionPoll::Ready(cursor) => break cursor,
        }
    };
    assert!(polls > 1);
    assert_eq!(pending.rows_processed(), 10);

    let result = cursor.materialize()?;
    assert_eq!(result.chunk_count(), 3);
    assert_eq!(result.row_count(), 10);

    let err = pending.poll().unwrap_err();
    assert!(matches!(err, Error::ResourceMisuse(Misuse::AlreadyCompleted)));
    Ok(())
}

#[test]
fn test_cancel_releases_session() -> Result<()> {
    let engine = Engine::open(EngineConfig::in_memory().set("chunk_size", "1"))?;
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let mut stmt = session.prepare_sql("SELECT * FROM t")?;
    let mut pending = stmt.execute_async()?;
    assert!(matches!(pending.poll()?, ExecutionPoll::Running));
    pending.cancel();

    assert!(!session.is_busy());
    assert_eq!(session.query("SELECT count(*) FROM t")?.row_count(), 1);
    Ok(())
}

#[test]
fn test_cancelled_export_leaves_no_file() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.csv");

    let engine = Engine::open(EngineConfig::in_memory().set("chunk_size", "1"))?;
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let sql = format!("COPY t TO '{}'", path.display());
    let mut stmt = session.prepare_sql(&sql)?;
    assert!(stmt.is_copy());
    let mut pending = stmt.execute_async()?;
    assert!(matches!(pending.poll()?, ExecutionPoll::Running));
    pending.cancel();

    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_interrupt_from_another_thread() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    let handle = session.cancel_handle();

    let mut stmt = session.prepare_sql(
        "WITH RECURSIVE s(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM s) \
         SELECT count(*) FROM s",
    )?;
    let mut pending = stmt.execute_async()?;

    std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(50));
            handle.cancel();
        });
        let err = loop {
            match pending.poll() {
                Ok(ExecutionPoll::Running) => continue,
                Ok(ExecutionPoll::Ready(_)) => panic!("unbounded query finished"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, Error::Interrupted), "{:?}", err);
    });

    drop(pending);
    assert!(!session.is_busy());
    Ok(())
}

#[test]
fn test_null_is_distinct_from_defaults() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    let result = session.query("SELECT NULL, 0, '', CAST(NULL AS INTEGER)")?;

    assert_eq!(result.value(0, 0, 0), Some(&Value::Null));
    assert_eq!(result.value(0, 1, 0), Some(&Value::Int(0)));
    assert_eq!(result.value(0, 2, 0), Some(&Value::Text(String::new())));
    assert_eq!(result.value(0, 3, 0), Some(&Value::Null));
    Ok(())
}

#[test]
fn test_rows_changed() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    session.execute_script(SETUP)?;

    let mut stmt = session.prepare_sql("UPDATE t SET name = upper(name) WHERE id >= ?")?;
    stmt.bind(1, 2)?;
    let cursor = stmt.execute()?;
    assert_eq!(cursor.column_count(), 0);
    assert_eq!(cursor.rows_changed(), 2);
    Ok(())
}

#[test]
fn test_sessions_share_the_engine() -> Result<()> {
    let engine = Engine::open(EngineConfig::in_memory())?;
    engine.connect()?.execute_script(SETUP)?;

    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| -> Result<i64> {
                    let session = engine.connect()?;
                    let result = session.query("SELECT sum(id) FROM t")?;
                    Ok(result.value(0, 0, 0).and_then(Value::as_i64).unwrap_or(0))
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap().unwrap(), 6);
        }
    });

    assert_eq!(engine.open_sessions(), 0);
    engine.close()
}

#[test]
fn test_script_with_trigger_body() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;

    let script = "CREATE TABLE t(x INT); CREATE TABLE log(x INT);
                  CREATE TRIGGER tr AFTER INSERT ON t BEGIN
                      INSERT INTO log VALUES (new.x);
                      INSERT INTO log VALUES (new.x * 10);
                  END;";
    assert_eq!(session.extract(script)?.len(), 3);
    session.execute_script(script)?;

    let changed = session.execute_script("INSERT INTO t VALUES (7)")?;
    assert_eq!(changed, 3);
    let result = session.query("SELECT x FROM log ORDER BY x")?;
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.value(0, 0, 0), Some(&Value::Int(7)));
    assert_eq!(result.value(0, 0, 1), Some(&Value::Int(70)));
    Ok(())
}

#[test]
fn test_bind_qualified_column_in_join() -> Result<()> {
    let engine = open();
    let session = engine.connect()?;
    session.execute_script(
        "CREATE TABLE a(k INT, code INTEGER); CREATE TABLE b(k INT, code TEXT);
         INSERT INTO a VALUES (1, 10); INSERT INTO b VALUES (1, 'x');",
    )?;

    let mut stmt =
        session.prepare_sql("SELECT a.k FROM a JOIN b ON a.k = b.k WHERE b.code = ?")?;
    assert_eq!(stmt.parameter_type(1), Some(ColumnType::Text));
    stmt.bind(1, "x")?;
    assert_eq!(stmt.execute()?.materialize()?.row_count(), 1);
    drop(stmt);

    let mut stmt = session.prepare_sql("SELECT * FROM a JOIN b ON a.k = b.k WHERE code = ?")?;
    assert_eq!(stmt.parameter_type(1), Some(ColumnType::Any));
    stmt.bind(1, 10)?;
    stmt.bind(1, "x")?;
    Ok(())
}
