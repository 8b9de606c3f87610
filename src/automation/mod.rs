//! Desktop automation used to create and compact Access database files.
//!
//! The storage engine's create and compact operations are only reachable
//! through the Access application's COM surface. [`Automation`] launches an
//! application session; [`with_session`] makes sure it is terminated again.

pub mod powershell;

pub use powershell::PowerShellAutomation;

use crate::error::{DbError, DbResult};
use std::path::Path;
use tracing::warn;

/// Locale descriptor for general (English) sort order.
pub const DB_LANG_GENERAL: &str = ";LANGID=0x0409;CP=1252;COUNTRY=0";

/// Database format version passed to `CreateDatabase` (`*.accdb`).
pub const DB_VERSION: u32 = 128;

/// DAO error numbers meaning the file is open elsewhere and exclusive access
/// could not be obtained.
pub const EXCLUSIVE_ACCESS_ERRORS: [i64; 5] = [3008, 3045, 3196, 3356, 3734];

const DAO_HRESULT_FACILITY: i64 = 0x800A_0000;

/// Launches automation sessions.
#[allow(async_fn_in_trait)]
pub trait Automation {
    type Session: AutomationSession;

    /// Start the application hidden and return a session bound to it.
    async fn launch(&self) -> DbResult<Self::Session>;
}

/// One running automation application.
#[allow(async_fn_in_trait)]
pub trait AutomationSession {
    /// `DBEngine.CreateDatabase(path, locale, version)`.
    async fn create_database(&mut self, path: &Path, locale: &str, version: u32) -> DbResult<()>;

    /// `DBEngine.CompactDatabase(source, destination)`.
    async fn compact_database(&mut self, source: &Path, destination: &Path) -> DbResult<()>;

    /// Terminate the application.
    async fn quit(self) -> DbResult<()>;
}

/// Launch a session, run `body` against it and quit on every path.
///
/// An error from `body` wins over an error raised while quitting.
pub async fn with_session<A, T, F>(automation: &A, body: F) -> DbResult<T>
where
    A: Automation,
    F: AsyncFnOnce(&mut A::Session) -> DbResult<T>,
{
    let mut session = automation.launch().await?;
    let result = body(&mut session).await;
    let quit = session.quit().await;
    match (result, quit) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(quit_err)) => {
            warn!(error = %quit_err, "Automation session failed to quit");
            Err(e)
        }
    }
}

/// Whether an automation failure code means exclusive access was denied.
///
/// Accepts the DAO error number either bare or wrapped in its HRESULT.
pub fn is_exclusive_access_error(code: i64) -> bool {
    let number = if code & !0xFFFF == DAO_HRESULT_FACILITY {
        code & 0xFFFF
    } else {
        code
    };
    EXCLUSIVE_ACCESS_ERRORS.contains(&number)
}

/// Reclassify an automation error that reports an exclusive-access failure.
pub(crate) fn classify_compact_error(err: DbError, path: &Path) -> DbError {
    match err {
        DbError::Automation {
            hresult: Some(code),
            ..
        } if is_exclusive_access_error(code) => DbError::exclusive_access_denied(path),
        other => other,
    }
}
