//! db-utils
//!
//! Thin wrappers exposing one connection lifecycle (`connect`, `cursor`,
//! `execute`, `executemany`, `close`) over Microsoft Access and Teradata
//! (ODBC), PostgreSQL and SQLite (sqlx), plus Access file creation and
//! compaction through desktop automation.

pub mod automation;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{Cursor, Database, scoped};
pub use error::{DbError, DbResult};
