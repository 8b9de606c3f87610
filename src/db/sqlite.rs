//! SQLite wrapper over a single native sqlx connection.

use crate::config::SqliteConfig;
use crate::db::params::sqlite_query;
use crate::db::{Cursor, Database, finish_close, sqlx_close_error};
use crate::error::{DbError, DbResult};
use crate::models::{Backend, ConnectionParameters, QueryParam, ResultSet};
use either::Either;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Executor};
use std::path::Path;
use std::time::Duration;
use tracing::{Instrument, Span, debug, info, info_span, warn};

pub struct SqliteDatabase {
    config: SqliteConfig,
    parameters: ConnectionParameters,
    handle: Option<SqliteConnection>,
    span: Span,
}

impl SqliteDatabase {
    /// Validate the configuration and store it. No connection is opened.
    pub fn new(config: SqliteConfig) -> DbResult<Self> {
        let config = config.normalized()?;
        let parameters = config.parameters();
        let span = info_span!("sqlite", database = %config.database.display());
        debug!(parent: &span, parameters = ?parameters, "SQLite wrapper initialised");
        Ok(Self {
            config,
            parameters,
            handle: None,
            span,
        })
    }

    /// Open the database at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::new(SqliteConfig::new(path.as_ref()))
    }

    /// Replace the span that scopes this wrapper's log events.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn path(&self) -> &Path {
        &self.config.database
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.config.database)
            .create_if_missing(self.config.create_if_missing && !self.config.read_only)
            .read_only(self.config.read_only)
            .busy_timeout(Duration::from_secs(self.config.timeout))
    }

    fn manual_commit(&self) -> bool {
        !self.config.autocommit
    }
}

impl Database for SqliteDatabase {
    type Connection = SqliteConnection;
    type Row = SqliteRow;
    type Cursor<'c> = SqliteCursor<'c>;

    fn backend(&self) -> Backend {
        Backend::SQLite
    }

    fn parameters(&self) -> &ConnectionParameters {
        &self.parameters
    }

    fn span(&self) -> &Span {
        &self.span
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    async fn connect(&mut self) -> DbResult<&mut SqliteConnection> {
        if self.handle.is_none() {
            let span = self.span.clone();
            let options = self.connect_options();
            let manual_commit = self.manual_commit();
            let conn = async move {
                let mut conn = options.connect().await?;
                if manual_commit {
                    conn.execute("BEGIN").await?;
                }
                info!(autocommit = !manual_commit, "Connection to database created");
                Ok::<_, DbError>(conn)
            }
            .instrument(span)
            .await?;
            self.handle = Some(conn);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| DbError::internal("SQLite connection handle missing after connect"))
    }

    async fn cursor(&mut self) -> DbResult<SqliteCursor<'_>> {
        debug!(parent: &self.span, "New cursor created");
        let conn = self.connect().await?;
        Ok(SqliteCursor { conn })
    }

    async fn commit(&mut self) -> DbResult<()> {
        let manual_commit = self.manual_commit();
        let Some(conn) = self.handle.as_mut() else {
            debug!(parent: &self.span, "Commit ignored, no open connection");
            return Ok(());
        };
        if manual_commit {
            Executor::execute(&mut *conn, "COMMIT").await?;
            Executor::execute(&mut *conn, "BEGIN").await?;
            debug!(parent: &self.span, "Transaction committed");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let manual_commit = self.manual_commit();
        let Some(conn) = self.handle.as_mut() else {
            debug!(parent: &self.span, "Rollback ignored, no open connection");
            return Ok(());
        };
        if manual_commit {
            Executor::execute(&mut *conn, "ROLLBACK").await?;
            Executor::execute(&mut *conn, "BEGIN").await?;
            debug!(parent: &self.span, "Transaction rolled back");
        }
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        let span = self.span.clone();
        let handle = self.handle.take();
        async move {
            info!("Close called");
            let result = match handle {
                Some(conn) => conn.close().await.map_err(sqlx_close_error),
                None => Err(DbError::already_closed("no open SQLite connection")),
            };
            finish_close(Backend::SQLite, result)
        }
        .instrument(span)
        .await
    }
}

impl Drop for SqliteDatabase {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!(parent: &self.span, "SQLite wrapper dropped with an open connection; call close() first");
        }
    }
}

/// Statement executor borrowed from an open SQLite connection.
pub struct SqliteCursor<'c> {
    conn: &'c mut SqliteConnection,
}

impl Cursor for SqliteCursor<'_> {
    type Row = SqliteRow;

    async fn execute(
        self,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<ResultSet<SqliteRow>> {
        let mut rows = Vec::new();
        let mut rows_affected = 0;
        let mut stream = match params {
            None => self.conn.fetch_many(sql),
            Some(params) => self.conn.fetch_many(sqlite_query(sql, params)),
        };
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => rows.push(row),
            }
        }
        Ok(ResultSet::new(rows, rows_affected))
    }

    async fn executemany(self, sql: &str, batch: &[Vec<QueryParam>]) -> DbResult<()> {
        for params in batch {
            sqlite_query(sql, params).execute(&mut *self.conn).await?;
        }
        Ok(())
    }
}
