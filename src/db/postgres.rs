//! PostgreSQL wrapper over a single native sqlx connection.

use crate::config::PostgresConfig;
use crate::db::params::postgres_query;
use crate::db::{Cursor, Database, finish_close, sqlx_close_error};
use crate::error::{DbError, DbResult};
use crate::models::{Backend, ConnectionParameters, QueryParam, ResultSet};
use either::Either;
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{ConnectOptions, Connection, Executor};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{Instrument, Span, debug, info, info_span, warn};

pub struct PostgresDatabase {
    config: PostgresConfig,
    parameters: ConnectionParameters,
    handle: Option<PgConnection>,
    span: Span,
}

impl PostgresDatabase {
    /// Validate the configuration and store it. No connection is opened.
    pub fn new(config: PostgresConfig) -> DbResult<Self> {
        let config = config.normalized()?;
        let parameters = config.parameters();
        let span = info_span!(
            "postgres",
            host = %config.dsn,
            database = %config.database_or_default()
        );
        debug!(parent: &span, parameters = ?parameters, "PostgreSQL wrapper initialised");
        Ok(Self {
            config,
            parameters,
            handle: None,
            span,
        })
    }

    /// Replace the span that scopes this wrapper's log events.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.dsn)
            .port(self.config.port_or_default())
            .username(&self.config.uid)
            .password(&self.config.pwd)
            .database(self.config.database_or_default())
            .application_name(env!("CARGO_PKG_NAME"))
    }

    fn manual_commit(&self) -> bool {
        !self.config.autocommit
    }
}

impl Database for PostgresDatabase {
    type Connection = PgConnection;
    type Row = PgRow;
    type Cursor<'c> = PostgresCursor<'c>;

    fn backend(&self) -> Backend {
        Backend::PostgreSQL
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

    async fn connect(&mut self) -> DbResult<&mut PgConnection> {
        if self.handle.is_none() {
            let span = self.span.clone();
            let options = self.connect_options();
            let manual_commit = self.manual_commit();
            let connect_timeout = self.config.timeout;
            let conn = async move {
                // A timeout of zero waits indefinitely
                let mut conn = if connect_timeout == 0 {
                    options.connect().await?
                } else {
                    let limit = Duration::from_secs(connect_timeout);
                    timeout(limit, options.connect())
                        .await
                        .map_err(|_| DbError::timeout("connect", limit))??
                };
                if manual_commit {
                    conn.execute("BEGIN").await?;
                }
                info!(autocommit = !manual_commit, "New connection created");
                Ok::<_, DbError>(conn)
            }
            .instrument(span)
            .await?;
            self.handle = Some(conn);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| DbError::internal("PostgreSQL connection handle missing after connect"))
    }

    async fn cursor(&mut self) -> DbResult<PostgresCursor<'_>> {
        debug!(parent: &self.span, "New cursor created");
        let conn = self.connect().await?;
        Ok(PostgresCursor { conn })
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
                None => Err(DbError::already_closed("no open PostgreSQL connection")),
            };
            finish_close(Backend::PostgreSQL, result)
        }
        .instrument(span)
        .await
    }
}

impl Drop for PostgresDatabase {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!(parent: &self.span, "PostgreSQL wrapper dropped with an open connection; call close() first");
        }
    }
}

/// Statement executor borrowed from an open PostgreSQL connection.
pub struct PostgresCursor<'c> {
    conn: &'c mut PgConnection,
}

impl Cursor for PostgresCursor<'_> {
    type Row = PgRow;

    async fn execute(self, sql: &str, params: Option<&[QueryParam]>) -> DbResult<ResultSet<PgRow>> {
        let mut rows = Vec::new();
        let mut rows_affected = 0;
        // Without parameters the text goes out as a simple query, which also
        // accepts statements the extended protocol cannot prepare.
        let mut stream = match params {
            None => self.conn.fetch_many(sql),
            Some(params) => self.conn.fetch_many(postgres_query(sql, params)),
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
            postgres_query(sql, params).execute(&mut *self.conn).await?;
        }
        Ok(())
    }
}
