//! `Access.Application` driven through a PowerShell child process.
//!
//! PowerShell reads commands from stdin (`-Command -`). Each request is one
//! line wrapped in `Invoke-Step`, which answers with exactly one line:
//!
//! ```text
//! OK
//! ERR<TAB><hresult><TAB><message>
//! ```
//!
//! Any other output line is ignored. A request that times out leaves the
//! session unusable: the host is killed and later requests fail at once.

use crate::automation::{Automation, AutomationSession};
use crate::config::AutomationConfig;
use crate::error::{DbError, DbResult};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const HOST_ARGS: [&str; 7] = [
    "-NoLogo",
    "-NoProfile",
    "-NonInteractive",
    "-ExecutionPolicy",
    "Bypass",
    "-Command",
    "-",
];

/// Defines `Invoke-Step`. Every statement must fit on one line.
const PRELUDE: [&str; 2] = [
    "$ErrorActionPreference = 'Stop'",
    concat!(
        "function Invoke-Step([scriptblock]$Body) { ",
        "try { & $Body | Out-Null; [Console]::Out.WriteLine('OK') } ",
        "catch { $e = $_.Exception; while ($e.InnerException) { $e = $e.InnerException }; ",
        "$code = if ($e.ErrorCode) { $e.ErrorCode } else { $e.HResult }; ",
        "$msg = $e.Message -replace '\\s+', ' '; ",
        "[Console]::Out.WriteLine(\"ERR`t$code`t$msg\") }; ",
        "[Console]::Out.Flush() }"
    ),
];

const START_APPLICATION: &str =
    "$global:app = New-Object -ComObject Access.Application; $app.Visible = $false";

const QUIT_APPLICATION: &str = concat!(
    "if ($app) { $app.Quit(); ",
    "[void][Runtime.InteropServices.Marshal]::ReleaseComObject($app); $global:app = $null }"
);

/// Launches `Access.Application` sessions through PowerShell.
#[derive(Debug, Clone, Default)]
pub struct PowerShellAutomation {
    config: AutomationConfig,
}

impl PowerShellAutomation {
    pub fn new(config: AutomationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }
}

impl Automation for PowerShellAutomation {
    type Session = PowerShellSession;

    async fn launch(&self) -> DbResult<PowerShellSession> {
        info!(program = %self.config.program, "Launching automation host");
        let mut command = Command::new(&self.config.program);
        command.args(HOST_ARGS);
        let mut session = PowerShellSession::spawn(command, self.config.response_timeout())
            .map_err(|e| {
                DbError::automation(
                    format!("failed to start {}: {}", self.config.program, e),
                    None,
                )
            })?;
        for line in PRELUDE {
            session.send_line(line).await?;
        }
        session.request(START_APPLICATION).await?;
        debug!("Access application started");
        Ok(session)
    }
}

/// A running PowerShell host holding one `Access.Application` instance.
///
/// Dropping the session kills the host process.
pub struct PowerShellSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    response_timeout: Duration,
    /// Set once a request went unanswered; its status line may still arrive.
    poisoned: bool,
}

impl PowerShellSession {
    fn spawn(mut command: Command, response_timeout: Duration) -> std::io::Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            response_timeout,
            poisoned: false,
        })
    }

    async fn send_line(&mut self, line: &str) -> DbResult<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Run one statement inside `Invoke-Step` and wait for its status line.
    ///
    /// On timeout the host is killed. A COM call still blocked inside
    /// `Access.exe` is not interrupted; that process lingers until COM
    /// reclaims the orphaned reference.
    async fn request(&mut self, statement: &str) -> DbResult<()> {
        if self.poisoned {
            return Err(DbError::automation(
                "automation host abandoned after an unanswered request",
                None,
            ));
        }
        self.send_line(&format!("Invoke-Step {{ {} }}", statement))
            .await?;
        let limit = self.response_timeout;
        match timeout(limit, self.read_status()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    timeout_secs = limit.as_secs(),
                    "Automation host did not answer, killing it"
                );
                self.poisoned = true;
                if let Err(e) = self.child.start_kill() {
                    warn!(error = %e, "Failed to kill automation host");
                }
                Err(DbError::timeout("automation response", limit))
            }
        }
    }

    async fn read_status(&mut self) -> DbResult<()> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(DbError::automation("automation host exited", None));
            };
            match parse_status(&line) {
                Some(status) => return status,
                None => debug!(output = %line, "Ignoring automation host output"),
            }
        }
    }
}

impl AutomationSession for PowerShellSession {
    async fn create_database(&mut self, path: &Path, locale: &str, version: u32) -> DbResult<()> {
        let statement = format!(
            "$app.DBEngine.CreateDatabase({}, {}, {}).Close()",
            ps_quote(&path.to_string_lossy()),
            ps_quote(locale),
            version
        );
        self.request(&statement).await
    }

    async fn compact_database(&mut self, source: &Path, destination: &Path) -> DbResult<()> {
        let statement = format!(
            "$app.DBEngine.CompactDatabase({}, {})",
            ps_quote(&source.to_string_lossy()),
            ps_quote(&destination.to_string_lossy())
        );
        self.request(&statement).await
    }

    async fn quit(mut self) -> DbResult<()> {
        if self.poisoned {
            // Already killed by the timed-out request; reap it.
            if let Err(e) = self.child.wait().await {
                warn!(error = %e, "Failed to wait for automation host");
            }
            return Ok(());
        }
        let result = self.request(QUIT_APPLICATION).await;
        // The host may already be gone; waiting below settles it either way.
        let _ = self.send_line("exit").await;
        drop(self.stdin);
        match timeout(self.response_timeout, self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Automation host exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for automation host"),
            Err(_) => {
                warn!("Automation host did not exit, killing it");
                self.child.kill().await?;
            }
        }
        result
    }
}

/// Parse one status line. `None` means the line is not part of the protocol.
fn parse_status(line: &str) -> Option<DbResult<()>> {
    let line = line.trim_end_matches('\r');
    if line == "OK" {
        return Some(Ok(()));
    }
    let rest = line.strip_prefix("ERR\t")?;
    let (code, message) = rest.split_once('\t').unwrap_or((rest, ""));
    Some(Err(DbError::automation(message.trim(), parse_hresult(code))))
}

/// COM reports HRESULTs as signed 32-bit integers; normalise to the unsigned form.
fn parse_hresult(code: &str) -> Option<i64> {
    let code = code.trim();
    let value = match code.strip_prefix("0x").or_else(|| code.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => code.parse::<i64>().ok()?,
    };
    match i32::try_from(value) {
        Ok(signed) if signed < 0 => Some(i64::from(signed as u32)),
        _ => Some(value),
    }
}

/// Quote a value as a PowerShell single-quoted string literal.
fn ps_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        // PowerShell also treats the typographic single quotes as delimiters
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            quoted.push(c);
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::is_exclusive_access_error;

    #[test]
    fn test_ps_quote() {
        assert_eq!(ps_quote(r"C:\data\db.accdb"), r"'C:\data\db.accdb'");
        assert_eq!(ps_quote("O'Brien.accdb"), "'O''Brien.accdb'");
        assert_eq!(ps_quote("a\u{2019}b"), "'a\u{2019}\u{2019}b'");
        assert_eq!(ps_quote(""), "''");
    }

    #[test]
    fn test_parse_status_ok() {
        assert!(matches!(parse_status("OK"), Some(Ok(()))));
        assert!(matches!(parse_status("OK\r"), Some(Ok(()))));
    }

    #[test]
    fn test_parse_status_err() {
        let Some(Err(DbError::Automation { message, hresult })) =
            parse_status("ERR\t-2146824932\tYou attempted to open a database that is already opened exclusively")
        else {
            panic!("expected automation error");
        };
        assert!(message.starts_with("You attempted"));
        assert_eq!(hresult, Some(0x800A_0D1C));
        assert!(is_exclusive_access_error(hresult.unwrap()));
    }

    #[test]
    fn test_parse_status_err_without_code() {
        let Some(Err(DbError::Automation { hresult, .. })) = parse_status("ERR\t\tboom") else {
            panic!("expected automation error");
        };
        assert_eq!(hresult, None);
    }

    #[test]
    fn test_parse_status_ignores_other_output() {
        assert!(parse_status("").is_none());
        assert!(parse_status("PS C:\\>").is_none());
        assert!(parse_status("OKAY").is_none());
    }

    #[test]
    fn test_parse_hresult() {
        assert_eq!(parse_hresult("3356"), Some(3356));
        assert_eq!(parse_hresult("0x800A0D1C"), Some(0x800A_0D1C));
        assert_eq!(parse_hresult("-2147467259"), Some(0x8000_4005));
        assert_eq!(parse_hresult("n/a"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unanswered_request_poisons_session() {
        // `cat` echoes requests back, which is never a status line
        let mut session =
            PowerShellSession::spawn(Command::new("cat"), Duration::from_millis(200)).unwrap();

        let err = session.request("$app.Quit()").await.unwrap_err();
        assert!(matches!(err, DbError::Timeout { .. }));
        assert!(session.poisoned);

        let err = session.request(QUIT_APPLICATION).await.unwrap_err();
        assert!(matches!(err, DbError::Automation { hresult: None, .. }));

        let quit = timeout(Duration::from_secs(2), session.quit()).await;
        assert!(matches!(quit, Ok(Ok(()))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_request_reads_status_lines() {
        // `cat` with the status already queued answers like a live host
        let mut session =
            PowerShellSession::spawn(Command::new("cat"), Duration::from_secs(2)).unwrap();
        session.send_line("OK").await.unwrap();
        session.request("$null").await.unwrap();
        assert!(!session.poisoned);
    }

    #[tokio::test]
    async fn test_launch_missing_program_is_automation_error() {
        let automation = PowerShellAutomation::new(AutomationConfig {
            program: "definitely-not-a-real-automation-host".to_string(),
            response_timeout_secs: 1,
        });
        let err = automation.launch().await.err().unwrap();
        assert!(matches!(err, DbError::Automation { .. }));
    }
}
