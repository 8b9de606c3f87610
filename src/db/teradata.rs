//! Teradata wrapper over the ODBC driver manager.

use crate::config::TeradataConfig;
use crate::db::odbc::{self, OdbcCursor, OdbcRow, SharedConnection};
use crate::db::{Database, finish_close};
use crate::error::{DbError, DbResult};
use crate::models::{Backend, ConnectionParameters};
use tracing::{Instrument, Span, debug, info, info_span, warn};

pub struct TeradataDatabase {
    config: TeradataConfig,
    parameters: ConnectionParameters,
    handle: Option<SharedConnection>,
    span: Span,
}

impl TeradataDatabase {
    /// Validate the configuration and store it. No connection is opened.
    pub fn new(config: TeradataConfig) -> DbResult<Self> {
        let config = config.normalized()?;
        let parameters = config.parameters();
        let span = info_span!("teradata", dsn = %config.dsn, uid = %config.uid);
        debug!(parent: &span, parameters = ?parameters, "Teradata wrapper initialised");
        Ok(Self {
            config,
            parameters,
            handle: None,
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &TeradataConfig {
        &self.config
    }
}

impl Database for TeradataDatabase {
    type Connection = SharedConnection;
    type Row = OdbcRow;
    type Cursor<'c> = OdbcCursor<'c>;

    fn backend(&self) -> Backend {
        Backend::Teradata
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

    async fn connect(&mut self) -> DbResult<&mut SharedConnection> {
        if self.handle.is_none() {
            let conn = odbc::open(&self.parameters)
                .instrument(self.span.clone())
                .await?;
            info!(parent: &self.span, autocommit = ?self.config.autocommit, "New connection created");
            self.handle = Some(conn);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| DbError::internal("Teradata connection handle missing after connect"))
    }

    async fn cursor(&mut self) -> DbResult<OdbcCursor<'_>> {
        debug!(parent: &self.span, "New cursor created");
        self.connect().await?;
        let conn = self
            .handle
            .as_ref()
            .ok_or_else(|| DbError::internal("Teradata connection handle missing after connect"))?;
        Ok(OdbcCursor::new(conn, &self.parameters))
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.handle.is_none() {
            return Ok(());
        }
        odbc::commit(&self.handle).await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.handle.is_none() {
            return Ok(());
        }
        odbc::rollback(&self.handle).await
    }

    async fn close(&mut self) -> DbResult<()> {
        let span = self.span.clone();
        let handle = self.handle.take();
        let autocommit = self.config.autocommit;
        async move {
            info!("Close called");
            let result = match handle {
                Some(conn) => odbc::close(conn, autocommit).await,
                None => Err(DbError::already_closed("no open Teradata connection")),
            };
            finish_close(Backend::Teradata, result)
        }
        .instrument(span)
        .await
    }
}

impl Drop for TeradataDatabase {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!(parent: &self.span, "Teradata wrapper dropped with an open connection; call close() first");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionKey;

    #[test]
    fn test_unset_options_are_not_passed_to_driver() {
        let db = TeradataDatabase::new(TeradataConfig::new("tdprod", "etl", "secret")).unwrap();
        let params = db.parameters();
        assert!(!params.contains(ConnectionKey::Driver));
        assert!(!params.contains(ConnectionKey::Autocommit));
        assert!(!params.contains(ConnectionKey::Timeout));
        assert_eq!(
            params.to_odbc_connection_string(),
            "DSN=tdprod;UID=etl;PWD=secret;"
        );
    }

    #[test]
    fn test_unicode_results_is_applied_outside_connection_string() {
        let config = TeradataConfig {
            unicode_results: Some(true),
            ..TeradataConfig::new("tdprod", "etl", "secret")
        };
        let db = TeradataDatabase::new(config).unwrap();
        assert_eq!(db.parameters().flag(ConnectionKey::UnicodeResults), Some(true));
        assert!(!db.parameters().to_odbc_connection_string().contains("Unicode"));
    }

    #[test]
    fn test_missing_dsn_is_rejected() {
        let err = TeradataDatabase::new(TeradataConfig::new("", "etl", "secret")).err();
        assert!(matches!(err, Some(DbError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_close_without_connection_is_ignored() {
        let mut db = TeradataDatabase::new(TeradataConfig::new("tdprod", "etl", "secret")).unwrap();
        db.close().await.unwrap();
        assert!(!db.is_connected());
    }
}
