//! Database abstraction layer.
//!
//! Every backend implements [`Database`]: it keeps its connection parameters,
//! opens at most one native connection lazily, hands out a fresh [`Cursor`]
//! for each statement and clears the handle on [`Database::close`].
//!
//! - `sqlite`, `postgres`: native sqlx connections
//! - `odbc`: shared ODBC plumbing used by `access` and `teradata`
//! - `params`: parameter binding for the sqlx backends
//! - `types`: uniform JSON view over native rows

pub mod access;
pub mod odbc;
pub mod params;
pub mod postgres;
pub mod sqlite;
pub mod teradata;
pub mod types;

pub use access::AccessDatabase;
pub use odbc::{OdbcCursor, OdbcRow, SharedConnection};
pub use postgres::{PostgresCursor, PostgresDatabase};
pub use sqlite::{SqliteCursor, SqliteDatabase};
pub use teradata::TeradataDatabase;
pub use types::RowValues;

use crate::error::{DbError, DbResult};
use crate::models::{Backend, ConnectionParameters, QueryParam, ResultSet};
use tracing::{Instrument, Span, debug};

/// A transient statement executor borrowed from an open connection.
///
/// A cursor is consumed by the statement it runs; wrappers create a new one
/// for every call.
#[allow(async_fn_in_trait)]
pub trait Cursor {
    type Row;

    /// Run one statement.
    ///
    /// `None` runs the SQL text as-is without preparing it; `Some` prepares it
    /// and binds the given parameters, even when the slice is empty.
    async fn execute(
        self,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<ResultSet<Self::Row>>;

    /// Run one prepared statement once per parameter tuple, in order.
    async fn executemany(self, sql: &str, batch: &[Vec<QueryParam>]) -> DbResult<()>;
}

/// Connection lifecycle shared by every backend wrapper.
///
/// Operations take `&mut self`; a wrapper is meant to be used by one caller
/// at a time.
#[allow(async_fn_in_trait)]
pub trait Database {
    /// Native connection handle.
    type Connection;
    /// Native row type returned by the driver.
    type Row;
    type Cursor<'c>: Cursor<Row = Self::Row>
    where
        Self: 'c;

    fn backend(&self) -> Backend;

    /// Keyword mapping handed to the native driver.
    fn parameters(&self) -> &ConnectionParameters;

    /// Span that scopes every log event emitted by this wrapper.
    fn span(&self) -> &Span;

    /// Whether a native connection is currently cached.
    fn is_connected(&self) -> bool;

    /// Return the cached connection, opening it first if there is none.
    async fn connect(&mut self) -> DbResult<&mut Self::Connection>;

    /// Connect if needed and hand out a new cursor.
    async fn cursor(&mut self) -> DbResult<Self::Cursor<'_>>;

    /// Commit the current transaction. No-op without an open connection.
    async fn commit(&mut self) -> DbResult<()>;

    /// Roll back the current transaction. No-op without an open connection.
    async fn rollback(&mut self) -> DbResult<()>;

    /// Close the cached connection.
    ///
    /// Closing with no open connection is ignored. Any other failure is
    /// returned, but the cached handle is cleared in every case.
    async fn close(&mut self) -> DbResult<()>;

    async fn execute(
        &mut self,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<ResultSet<Self::Row>> {
        let span = self.span().clone();
        async {
            debug!(sql = %sql, params = ?params.map(<[QueryParam]>::len), "Execute called");
            self.cursor().await?.execute(sql, params).await
        }
        .instrument(span)
        .await
    }

    async fn executemany(&mut self, sql: &str, batch: &[Vec<QueryParam>]) -> DbResult<()> {
        let span = self.span().clone();
        async {
            debug!(sql = %sql, batch = batch.len(), "Executemany called");
            self.cursor().await?.executemany(sql, batch).await
        }
        .instrument(span)
        .await
    }
}

/// Run `body` against `db` and close it afterwards on every path.
///
/// The body's error wins over an error raised while closing.
pub async fn scoped<D, T, F>(mut db: D, body: F) -> DbResult<T>
where
    D: Database,
    F: AsyncFnOnce(&mut D) -> DbResult<T>,
{
    let result = body(&mut db).await;
    let closed = db.close().await;
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), _) => Err(e),
    }
}

/// Map a native close failure, recognising a socket that is already gone.
pub(crate) fn sqlx_close_error(err: sqlx::Error) -> DbError {
    use std::io::ErrorKind;

    match &err {
        sqlx::Error::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            DbError::already_closed(io.to_string())
        }
        _ => err.into(),
    }
}

/// Shared tail of every `close`: swallow the already-closed condition and
/// surface anything else.
pub(crate) fn finish_close(backend: Backend, result: DbResult<()>) -> DbResult<()> {
    match result {
        Ok(()) => {
            debug!(backend = %backend, "Connection closed");
            Ok(())
        }
        Err(DbError::AlreadyClosed { message }) => {
            tracing::info!(backend = %backend, reason = %message, "Closing exception ignored");
            Ok(())
        }
        Err(e) => {
            tracing::error!(backend = %backend, error = %e, "Unhandled exception while closing");
            Err(e)
        }
    }
}
