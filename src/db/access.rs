//! Microsoft Access wrapper over the ODBC driver manager.
//!
//! Besides the common lifecycle, Access files are created and compacted
//! through the desktop application (see [`crate::automation`]).

use crate::automation::{
    Automation, AutomationSession, DB_LANG_GENERAL, DB_VERSION, classify_compact_error,
    with_session,
};
use crate::config::AccessConfig;
use crate::db::odbc::{self, OdbcCursor, OdbcRow, SharedConnection};
use crate::db::{Database, finish_close};
use crate::error::{DbError, DbResult};
use crate::models::{Backend, ConnectionParameters};
use std::path::{Path, PathBuf};
use tracing::{Instrument, Span, debug, info, info_span, warn};

pub struct AccessDatabase {
    config: AccessConfig,
    parameters: ConnectionParameters,
    handle: Option<SharedConnection>,
    span: Span,
}

impl AccessDatabase {
    /// Validate the configuration and store it. No connection is opened.
    pub fn new(config: AccessConfig) -> DbResult<Self> {
        let config = config.normalized()?;
        let parameters = config.parameters();
        let span = info_span!("access", dbq = %config.dbq.display());
        debug!(parent: &span, parameters = ?parameters, "Access wrapper initialised");
        Ok(Self {
            config,
            parameters,
            handle: None,
            span,
        })
    }

    /// Bind to the database file at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::new(AccessConfig::new(path.as_ref()))
    }

    /// Replace the span that scopes this wrapper's log events.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn path(&self) -> &Path {
        &self.config.dbq
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Create a new Access database file and return a wrapper bound to it.
    ///
    /// An existing file is an error unless `delete_if_exists` is set, in which
    /// case it is removed first. The automation session is terminated on
    /// every path.
    pub async fn create_database<A: Automation>(
        path: impl AsRef<Path>,
        delete_if_exists: bool,
        automation: &A,
    ) -> DbResult<Self> {
        let config = AccessConfig::new(path.as_ref()).normalized()?;
        let path = config.dbq.clone();
        let span = info_span!("access", dbq = %path.display());
        async {
            if tokio::fs::try_exists(&path).await? {
                if !delete_if_exists {
                    return Err(DbError::file_already_exists(&path));
                }
                info!("Deleting existing database file");
                tokio::fs::remove_file(&path).await?;
            }
            with_session(automation, async |session: &mut A::Session| {
                session
                    .create_database(&path, DB_LANG_GENERAL, DB_VERSION)
                    .await
            })
            .await?;
            info!("Database created");
            Ok::<(), DbError>(())
        }
        .instrument(span.clone())
        .await?;
        Ok(Self::new(config)?.with_span(span))
    }

    /// Compact and repair the database file in place.
    ///
    /// Any open connection is closed first. When the file is open elsewhere
    /// and exclusive access is denied, compaction is skipped and the original
    /// file is left untouched.
    pub async fn compact_database<A: Automation>(&mut self, automation: &A) -> DbResult<()> {
        self.close().await?;
        let source = self.config.dbq.clone();
        let temp = temp_path(&source)?;
        let span = self.span.clone();
        async move {
            // Leftover from an interrupted run; CompactDatabase refuses an existing target
            if tokio::fs::try_exists(&temp).await? {
                warn!(temp = %temp.display(), "Removing stale compaction target");
                tokio::fs::remove_file(&temp).await?;
            }
            info!(temp = %temp.display(), "Compacting database");
            let compacted = with_session(automation, async |session: &mut A::Session| {
                session.compact_database(&source, &temp).await
            })
            .await
            .map_err(|e| classify_compact_error(e, &source));
            match compacted {
                Ok(()) => {}
                Err(DbError::ExclusiveAccessDenied { .. }) => {
                    warn!("Could not gain exclusive access, compaction skipped");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            tokio::fs::remove_file(&source).await?;
            tokio::fs::rename(&temp, &source).await?;
            info!("Database compacted");
            Ok::<(), DbError>(())
        }
        .instrument(span)
        .await
    }
}

/// Sibling path `temp_<file name>` used as the compaction target.
pub(crate) fn temp_path(path: &Path) -> DbResult<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        DbError::invalid_config(format!("{} does not name a file", path.display()))
    })?;
    let mut temp_name = std::ffi::OsString::from("temp_");
    temp_name.push(name);
    Ok(path.with_file_name(temp_name))
}

impl Database for AccessDatabase {
    type Connection = SharedConnection;
    type Row = OdbcRow;
    type Cursor<'c> = OdbcCursor<'c>;

    fn backend(&self) -> Backend {
        Backend::Access
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
            info!(parent: &self.span, autocommit = self.config.autocommit, "Connection to database created");
            self.handle = Some(conn);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| DbError::internal("Access connection handle missing after connect"))
    }

    async fn cursor(&mut self) -> DbResult<OdbcCursor<'_>> {
        debug!(parent: &self.span, "New cursor created");
        self.connect().await?;
        let conn = self
            .handle
            .as_ref()
            .ok_or_else(|| DbError::internal("Access connection handle missing after connect"))?;
        Ok(OdbcCursor::new(conn, &self.parameters))
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.handle.is_none() {
            debug!(parent: &self.span, "Commit ignored, no open connection");
            return Ok(());
        }
        odbc::commit(&self.handle).await?;
        debug!(parent: &self.span, "Transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.handle.is_none() {
            debug!(parent: &self.span, "Rollback ignored, no open connection");
            return Ok(());
        }
        odbc::rollback(&self.handle).await?;
        debug!(parent: &self.span, "Transaction rolled back");
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        let span = self.span.clone();
        let handle = self.handle.take();
        let autocommit = Some(self.config.autocommit);
        async move {
            info!("Close called");
            let result = match handle {
                Some(conn) => odbc::close(conn, autocommit).await,
                None => Err(DbError::already_closed("no open Access connection")),
            };
            finish_close(Backend::Access, result)
        }
        .instrument(span)
        .await
    }
}

impl Drop for AccessDatabase {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!(parent: &self.span, "Access wrapper dropped with an open connection; call close() first");
        }
    }
}
