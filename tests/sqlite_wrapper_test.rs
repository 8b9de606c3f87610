//! Integration tests for the SQLite wrapper lifecycle.
//!
//! Tests verify that:
//! - Connections are opened lazily and cached
//! - close() clears the handle in every path
//! - execute/executemany forward SQL and parameters to the driver
//! - Rows come back in driver order and can be viewed as JSON

use db_utils::config::SqliteConfig;
use db_utils::db::{RowValues, SqliteDatabase};
use db_utils::models::QueryParam;
use db_utils::{Database, DbError, scoped};
use serde_json::json;
use sqlx::Row;
use sqlx::sqlite::SqliteConnection;
use tempfile::TempDir;

fn temp_db() -> (TempDir, SqliteDatabase) {
    let dir = tempfile::tempdir().unwrap();
    let db = SqliteDatabase::open(dir.path().join("test.db")).unwrap();
    (dir, db)
}

async fn count(db: &mut SqliteDatabase, table: &str) -> i64 {
    let result = db
        .execute(&format!("SELECT COUNT(*) FROM {}", table), None)
        .await
        .unwrap();
    result.rows[0].try_get::<i64, _>(0).unwrap()
}

#[tokio::test]
async fn test_construct_does_not_connect() {
    let (dir, db) = temp_db();
    assert!(!db.is_connected());
    assert!(!dir.path().join("test.db").exists());
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let (_dir, mut db) = temp_db();
    let first = db.connect().await.unwrap() as *mut SqliteConnection;
    let second = db.connect().await.unwrap() as *mut SqliteConnection;
    assert_eq!(first, second);
    assert!(db.is_connected());
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_close_clears_handle_in_every_path() {
    // Never opened
    let (_dir, mut db) = temp_db();
    db.close().await.unwrap();
    assert!(!db.is_connected());

    // Open, then closed twice
    db.connect().await.unwrap();
    db.close().await.unwrap();
    assert!(!db.is_connected());
    db.close().await.unwrap();
    assert!(!db.is_connected());

    // Reconnects on demand after close
    db.execute("SELECT 1", None).await.unwrap();
    assert!(db.is_connected());
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_create_insert_count_roundtrip() {
    let (_dir, mut db) = temp_db();
    db.execute("CREATE TABLE test (name TEXT)", None)
        .await
        .unwrap();

    let inserted = db
        .execute(
            "INSERT INTO test (name) VALUES (?)",
            Some(&[QueryParam::from("Z")]),
        )
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, 1);
    assert!(inserted.is_empty());

    assert_eq!(count(&mut db, "test").await, 1);

    let result = db.execute("SELECT name FROM test", None).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].try_get::<String, _>("name").unwrap(), "Z");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_executemany_preserves_order() {
    let (_dir, mut db) = temp_db();
    db.execute(
        "CREATE TABLE letters (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
        None,
    )
    .await
    .unwrap();

    let letters = ["A", "B", "C", "D", "E", "F", "G"];
    let batch: Vec<Vec<QueryParam>> = letters.iter().map(|l| vec![QueryParam::from(*l)]).collect();
    db.executemany("INSERT INTO letters (name) VALUES (?)", &batch)
        .await
        .unwrap();

    let result = db
        .execute("SELECT name FROM letters ORDER BY id", None)
        .await
        .unwrap();
    let names: Vec<String> = result
        .rows
        .iter()
        .map(|row| row.try_get::<String, _>(0).unwrap())
        .collect();
    assert_eq!(names, letters);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_executemany_with_empty_batch_is_noop() {
    let (_dir, mut db) = temp_db();
    db.execute("CREATE TABLE t (x INTEGER)", None).await.unwrap();
    db.executemany("INSERT INTO t (x) VALUES (?)", &[])
        .await
        .unwrap();
    assert_eq!(count(&mut db, "t").await, 0);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_params_vs_no_params() {
    let (_dir, mut db) = temp_db();

    // No parameters: the text runs as-is
    db.execute(
        "CREATE TABLE a (x INTEGER); CREATE TABLE b (y INTEGER)",
        None,
    )
    .await
    .unwrap();

    // Empty parameter list: still a prepared execution
    let result = db.execute("SELECT 42 AS answer", Some(&[])).await.unwrap();
    assert_eq!(result.rows[0].try_get::<i64, _>("answer").unwrap(), 42);

    assert_eq!(count(&mut db, "a").await, 0);
    assert_eq!(count(&mut db, "b").await, 0);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_parameter_types_bind() {
    let (_dir, mut db) = temp_db();
    db.execute(
        "CREATE TABLE typed (i INTEGER, f REAL, s TEXT, b BLOB, n TEXT, flag BOOLEAN)",
        None,
    )
    .await
    .unwrap();
    db.execute(
        "INSERT INTO typed VALUES (?, ?, ?, ?, ?, ?)",
        Some(&[
            QueryParam::Int(7),
            QueryParam::Float(2.5),
            QueryParam::from("text"),
            QueryParam::Bytes(vec![1, 2, 3]),
            QueryParam::Null,
            QueryParam::Bool(true),
        ]),
    )
    .await
    .unwrap();

    let result = db.execute("SELECT * FROM typed", None).await.unwrap();
    let row = &result.rows[0];
    assert_eq!(row.try_get::<i64, _>("i").unwrap(), 7);
    assert_eq!(row.try_get::<f64, _>("f").unwrap(), 2.5);
    assert_eq!(row.try_get::<String, _>("s").unwrap(), "text");
    assert_eq!(row.try_get::<Vec<u8>, _>("b").unwrap(), vec![1, 2, 3]);
    assert_eq!(row.try_get::<Option<String>, _>("n").unwrap(), None);
    assert!(row.try_get::<bool, _>("flag").unwrap());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_rows_as_json() {
    let (_dir, mut db) = temp_db();
    db.execute("CREATE TABLE people (name TEXT, age INTEGER)", None)
        .await
        .unwrap();
    db.execute(
        "INSERT INTO people VALUES (?, ?)",
        Some(&[QueryParam::from("Ada"), QueryParam::Int(36)]),
    )
    .await
    .unwrap();

    let result = db.execute("SELECT name, age FROM people", None).await.unwrap();
    let row = &result.rows[0];
    assert_eq!(row.column_names(), vec!["name", "age"]);
    assert_eq!(
        serde_json::Value::Object(row.to_json_map()),
        json!({ "name": "Ada", "age": 36 })
    );

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_unicode_text_roundtrip() {
    let (_dir, mut db) = temp_db();
    db.execute("CREATE TABLE notes (body TEXT)", None)
        .await
        .unwrap();
    let body = "Grüße, 世界 🌍";
    db.execute("INSERT INTO notes VALUES (?)", Some(&[QueryParam::from(body)]))
        .await
        .unwrap();
    let result = db.execute("SELECT body FROM notes", None).await.unwrap();
    assert_eq!(result.rows[0].try_get::<String, _>(0).unwrap(), body);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_sql_error_propagates() {
    let (_dir, mut db) = temp_db();
    let err = db
        .execute("SELECT * FROM missing_table", None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DbError::Database { .. }));
    assert!(!err.is_recoverable());
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_read_only_does_not_create_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.db");
    let config = SqliteConfig {
        read_only: true,
        ..SqliteConfig::new(&path)
    };
    let mut db = SqliteDatabase::new(config).unwrap();
    assert!(db.connect().await.is_err());
    assert!(!db.is_connected());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_scoped_closes_and_returns_value() {
    let (_dir, db) = temp_db();
    let total = scoped(db, async |db: &mut SqliteDatabase| {
        db.execute("CREATE TABLE t (x INTEGER)", None).await?;
        db.executemany(
            "INSERT INTO t (x) VALUES (?)",
            &[vec![QueryParam::Int(1)], vec![QueryParam::Int(2)]],
        )
        .await?;
        let result = db.execute("SELECT SUM(x) FROM t", None).await?;
        Ok(result.rows[0].try_get::<i64, _>(0)?)
    })
    .await
    .unwrap();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn test_scoped_returns_body_error() {
    let (_dir, db) = temp_db();
    let err = scoped(db, async |db: &mut SqliteDatabase| {
        db.execute("SELECT 1", None).await?;
        Err::<(), _>(DbError::internal("body failed"))
    })
    .await
    .unwrap_err();
    assert!(matches!(err, DbError::Internal { .. }));
}
