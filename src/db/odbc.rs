//! ODBC plumbing shared by the Access and Teradata wrappers.
//!
//! The driver manager API is blocking. Every call runs on tokio's blocking
//! pool against a connection shared with the wrapper behind a mutex. The
//! wrapper's handle never leaves its slot, so dropping an in-flight call
//! loses nothing: the blocking task finishes on its own and the next call
//! waits for the lock.

use crate::db::Cursor;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionKey, ConnectionParameters, QueryParam, ResultSet};
use odbc_api::parameter::InputParameter;
use odbc_api::{Bit, Connection, ConnectionOptions, Environment, IntoParameter};
use odbc_api::{Cursor as _, ResultSetMetadata as _};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::debug;

/// Native ODBC connection handle.
pub type OdbcConnection = Connection<'static>;

/// Connection handle shared between a wrapper and its blocking calls.
pub type SharedConnection = Arc<Mutex<OdbcConnection>>;

static ODBC_ENV: OnceLock<Environment> = OnceLock::new();

/// Process-wide ODBC environment, created on first use.
fn environment() -> DbResult<&'static Environment> {
    if let Some(env) = ODBC_ENV.get() {
        return Ok(env);
    }
    let env = Environment::new()?;
    Ok(ODBC_ENV.get_or_init(|| env))
}

/// One row fetched through ODBC, with every value rendered as text.
#[derive(Debug, Clone, PartialEq)]
pub struct OdbcRow {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl OdbcRow {
    pub fn new(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order; `None` is SQL NULL.
    pub fn texts(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Run blocking ODBC work on the blocking pool.
async fn blocking<T, F>(work: F) -> DbResult<T>
where
    F: FnOnce() -> DbResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DbError::internal(format!("ODBC worker failed: {}", e)))?
}

/// Run blocking work against a shared connection.
///
/// The task holds its own reference, so cancelling the returned future
/// neither empties the wrapper's slot nor interrupts the driver call.
async fn with_connection<C, T, F>(conn: &Arc<Mutex<C>>, work: F) -> DbResult<T>
where
    C: Send + 'static,
    F: FnOnce(&mut C) -> DbResult<T> + Send + 'static,
    T: Send + 'static,
{
    let shared = Arc::clone(conn);
    blocking(move || {
        let mut conn = lock(&shared)?;
        work(&mut *conn)
    })
    .await
}

fn lock<C>(shared: &Mutex<C>) -> DbResult<MutexGuard<'_, C>> {
    shared
        .lock()
        .map_err(|_| DbError::internal("ODBC connection poisoned by a panicked call"))
}

/// Open a connection from the driver-string keywords of `parameters`.
///
/// The timeout is passed through as the login timeout and autocommit is
/// applied only when it was configured.
pub(crate) async fn open(parameters: &ConnectionParameters) -> DbResult<SharedConnection> {
    let connection_string = parameters.to_odbc_connection_string();
    let login_timeout_sec = parameters
        .number(ConnectionKey::Timeout)
        .map(|t| u32::try_from(t).unwrap_or(u32::MAX));
    let autocommit = parameters.flag(ConnectionKey::Autocommit);
    blocking(move || {
        let env = environment()?;
        let options = ConnectionOptions {
            login_timeout_sec,
            ..ConnectionOptions::default()
        };
        let conn = env.connect_with_connection_string(&connection_string, options)?;
        if let Some(enabled) = autocommit {
            conn.set_autocommit(enabled)?;
        }
        Ok(Arc::new(Mutex::new(conn)))
    })
    .await
}

/// Release a connection, rolling back uncommitted work unless autocommit is on.
///
/// SQLSTATE 08003 (connection not open) is reported as already closed. A
/// call still running on the blocking pool finishes first; the native handle
/// is freed with the last reference.
pub(crate) async fn close(conn: SharedConnection, autocommit: Option<bool>) -> DbResult<()> {
    blocking(move || {
        if autocommit != Some(true) {
            lock(&conn)?.rollback().map_err(close_error)?;
        }
        drop(conn);
        Ok(())
    })
    .await
}

fn close_error(err: odbc_api::Error) -> DbError {
    match &err {
        odbc_api::Error::Diagnostics { record, .. } if record.state.as_str() == "08003" => {
            DbError::already_closed(err.to_string())
        }
        _ => err.into(),
    }
}

fn open_slot(slot: &Option<SharedConnection>) -> DbResult<&SharedConnection> {
    slot.as_ref()
        .ok_or_else(|| DbError::already_closed("no open ODBC connection"))
}

pub(crate) async fn commit(slot: &Option<SharedConnection>) -> DbResult<()> {
    with_connection(open_slot(slot)?, |conn: &mut OdbcConnection| Ok(conn.commit()?)).await
}

pub(crate) async fn rollback(slot: &Option<SharedConnection>) -> DbResult<()> {
    with_connection(open_slot(slot)?, |conn: &mut OdbcConnection| Ok(conn.rollback()?)).await
}

fn to_odbc_params(params: &[QueryParam]) -> Vec<Box<dyn InputParameter>> {
    params
        .iter()
        .map(|param| -> Box<dyn InputParameter> {
            match param {
                QueryParam::Null => Box::new(None::<String>.into_parameter()),
                QueryParam::Bool(v) => Box::new(Bit::from_bool(*v)),
                QueryParam::Int(v) => Box::new(*v),
                QueryParam::Float(v) => Box::new(*v),
                QueryParam::String(v) => Box::new(v.clone().into_parameter()),
                QueryParam::Bytes(v) => Box::new(v.clone().into_parameter()),
            }
        })
        .collect()
}

fn fetch_rows(cursor: &mut impl odbc_api::Cursor, wide_text: bool) -> DbResult<Vec<OdbcRow>> {
    let columns: Arc<[String]> = cursor
        .column_names()?
        .collect::<Result<Vec<_>, _>>()?
        .into();
    let mut rows = Vec::new();
    let mut buf = Vec::new();
    let mut wide_buf = Vec::new();
    while let Some(mut row) = cursor.next_row()? {
        let mut values = Vec::with_capacity(columns.len());
        // ODBC column numbers start at 1
        for col in 1..=columns.len() {
            let col = u16::try_from(col)
                .map_err(|_| DbError::internal("result set has too many columns"))?;
            let value = if wide_text {
                wide_buf.clear();
                row.get_wide_text(col, &mut wide_buf)?
                    .then(|| String::from_utf16_lossy(&wide_buf))
            } else {
                buf.clear();
                row.get_text(col, &mut buf)?
                    .then(|| String::from_utf8_lossy(&buf).into_owned())
            };
            values.push(value);
        }
        rows.push(OdbcRow::new(columns.clone(), values));
    }
    Ok(rows)
}

fn execute_blocking(
    conn: &OdbcConnection,
    sql: &str,
    params: Option<&[QueryParam]>,
    wide_text: bool,
) -> DbResult<ResultSet<OdbcRow>> {
    let bound = params.map(to_odbc_params).unwrap_or_default();
    let cursor = if params.is_some() {
        conn.execute(sql, bound.as_slice(), None)?
    } else {
        conn.execute(sql, (), None)?
    };
    match cursor {
        Some(mut cursor) => Ok(ResultSet::new(fetch_rows(&mut cursor, wide_text)?, 0)),
        None => Ok(ResultSet::default()),
    }
}

fn executemany_blocking(
    conn: &OdbcConnection,
    sql: &str,
    batch: &[Vec<QueryParam>],
) -> DbResult<()> {
    let mut prepared = conn.prepare(sql)?;
    for params in batch {
        let bound = to_odbc_params(params);
        prepared.execute(bound.as_slice())?;
    }
    Ok(())
}

/// Statement executor borrowed from an open ODBC connection.
///
/// ODBC drivers do not report affected row counts through this path, so
/// `rows_affected` is always zero.
pub struct OdbcCursor<'c> {
    conn: &'c SharedConnection,
    wide_text: bool,
}

impl<'c> OdbcCursor<'c> {
    /// Text is fetched as UTF-16 when `UnicodeResults` is set.
    pub(crate) fn new(conn: &'c SharedConnection, parameters: &ConnectionParameters) -> Self {
        Self {
            conn,
            wide_text: parameters
                .flag(ConnectionKey::UnicodeResults)
                .unwrap_or(false),
        }
    }
}

impl Cursor for OdbcCursor<'_> {
    type Row = OdbcRow;

    async fn execute(
        self,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<ResultSet<OdbcRow>> {
        let sql = sql.to_string();
        let params = params.map(<[QueryParam]>::to_vec);
        let wide_text = self.wide_text;
        let result = with_connection(self.conn, move |conn: &mut OdbcConnection| {
            execute_blocking(conn, &sql, params.as_deref(), wide_text)
        })
        .await?;
        debug!(rows = result.len(), "Statement executed");
        Ok(result)
    }

    async fn executemany(self, sql: &str, batch: &[Vec<QueryParam>]) -> DbResult<()> {
        let sql = sql.to_string();
        let batch = batch.to_vec();
        with_connection(self.conn, move |conn: &mut OdbcConnection| {
            executemany_blocking(conn, &sql, &batch)
        })
        .await
    }
}
