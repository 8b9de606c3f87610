//! Integration tests for the ODBC execution path.
//!
//! The wrapper is driven through a DSN, so any configured data source works.
//! Tests that need one are skipped unless TEST_ODBC_DSN is set; TEST_ODBC_UID
//! and TEST_ODBC_PWD supply credentials when the source requires them.
//! Example: TEST_ODBC_DSN="SQLite3 Datasource"

use db_utils::config::TeradataConfig;
use db_utils::db::TeradataDatabase;
use db_utils::models::QueryParam;
use db_utils::Database;
use std::sync::Arc;

const TABLE: &str = "db_utils_odbc_test";

fn live_db() -> Option<TeradataDatabase> {
    let dsn = match std::env::var("TEST_ODBC_DSN") {
        Ok(dsn) => dsn,
        Err(_) => {
            eprintln!("Skipping test: TEST_ODBC_DSN not set");
            return None;
        }
    };
    let uid = std::env::var("TEST_ODBC_UID").unwrap_or_else(|_| "test".to_string());
    let pwd = std::env::var("TEST_ODBC_PWD").unwrap_or_default();
    let config = TeradataConfig {
        autocommit: Some(true),
        ..TeradataConfig::new(dsn, uid, pwd)
    };
    Some(TeradataDatabase::new(config).unwrap())
}

async fn recreate_table(db: &mut TeradataDatabase) {
    // Left behind by an earlier failed run
    let _ = db.execute(&format!("DROP TABLE {}", TABLE), None).await;
    db.execute(
        &format!("CREATE TABLE {} (id INTEGER, name VARCHAR(20))", TABLE),
        None,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_unknown_dsn_leaves_no_handle() {
    let config = TeradataConfig {
        timeout: Some(2),
        ..TeradataConfig::new("db-utils-no-such-dsn", "test", "secret")
    };
    let mut db = TeradataDatabase::new(config).unwrap();

    assert!(db.connect().await.is_err());
    assert!(!db.is_connected());

    db.close().await.unwrap();
    assert!(!db.is_connected());
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let Some(mut db) = live_db() else { return };

    let first = Arc::clone(db.connect().await.unwrap());
    let second = Arc::clone(db.connect().await.unwrap());
    assert!(Arc::ptr_eq(&first, &second));
    drop((first, second));

    db.close().await.unwrap();
    assert!(!db.is_connected());
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_execute_and_executemany_roundtrip() {
    let Some(mut db) = live_db() else { return };
    recreate_table(&mut db).await;

    db.execute(
        &format!("INSERT INTO {} (id, name) VALUES (?, ?)", TABLE),
        Some(&[QueryParam::from(0_i64), QueryParam::from("Z")]),
    )
    .await
    .unwrap();

    let letters = ["A", "B", "C"];
    let batch: Vec<Vec<QueryParam>> = letters
        .iter()
        .enumerate()
        .map(|(i, l)| vec![QueryParam::from(i as i64 + 1), QueryParam::from(*l)])
        .collect();
    db.executemany(
        &format!("INSERT INTO {} (id, name) VALUES (?, ?)", TABLE),
        &batch,
    )
    .await
    .unwrap();

    let result = db
        .execute(&format!("SELECT id, name FROM {} ORDER BY id", TABLE), None)
        .await
        .unwrap();
    let names: Vec<&str> = result.rows.iter().filter_map(|row| row.get(1)).collect();
    assert_eq!(names, ["Z", "A", "B", "C"]);
    assert_eq!(result.rows[0].columns().len(), 2);

    db.execute(&format!("DROP TABLE {}", TABLE), None)
        .await
        .unwrap();
    db.close().await.unwrap();
    assert!(!db.is_connected());
}

#[tokio::test]
async fn test_sql_error_keeps_connection() {
    let Some(mut db) = live_db() else { return };

    assert!(db.execute("SELEC nonsense", None).await.is_err());
    assert!(db.is_connected());
    db.execute("SELECT 1", None).await.unwrap();

    db.close().await.unwrap();
}
