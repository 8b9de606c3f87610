//! Connection-related data models.
//!
//! This module defines the backend identifiers and the keyword mapping handed
//! to native drivers when a connection is opened.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Microsoft Access through the ODBC driver manager
    Access,
    PostgreSQL,
    SQLite,
    /// Teradata through the ODBC driver manager
    Teradata,
}

impl Backend {
    /// Get the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Access => "Access",
            Self::PostgreSQL => "PostgreSQL",
            Self::SQLite => "SQLite",
            Self::Teradata => "Teradata",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Recognized connection keywords.
///
/// Ordering follows declaration order, which is also the order keywords
/// appear in a rendered ODBC connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKey {
    Driver,
    Dsn,
    Dbq,
    Database,
    Uid,
    Pwd,
    Autocommit,
    ReadOnly,
    Timeout,
    /// Fetch text through the wide (UTF-16) ODBC entry points
    UnicodeResults,
}

impl ConnectionKey {
    /// Keyword used in an ODBC connection string, or `None` for keys that
    /// are applied through driver API calls instead.
    pub fn odbc_keyword(&self) -> Option<&'static str> {
        match self {
            Self::Driver => Some("Driver"),
            Self::Dsn => Some("DSN"),
            Self::Dbq => Some("DBQ"),
            Self::Database => Some("Database"),
            Self::Uid => Some("UID"),
            Self::Pwd => Some("PWD"),
            _ => None,
        }
    }

    /// Whether the value is a secret that must never be logged.
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Pwd)
    }
}

/// A scalar connection setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(u64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        Self::Int(v)
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Keyword mapping passed to a native driver's connect call.
///
/// Absent settings are never stored, so they are never passed to the driver.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionParameters {
    entries: BTreeMap<ConnectionKey, ParamValue>,
}

impl ConnectionParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a keyword, replacing any previous value.
    pub fn with(mut self, key: ConnectionKey, value: impl Into<ParamValue>) -> Self {
        self.entries.insert(key, value.into());
        self
    }

    /// Set a keyword only when a value is present.
    pub fn with_opt<V: Into<ParamValue>>(self, key: ConnectionKey, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: ConnectionKey) -> Option<&ParamValue> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: ConnectionKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn text(&self, key: ConnectionKey) -> Option<&str> {
        match self.entries.get(&key) {
            Some(ParamValue::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn flag(&self, key: ConnectionKey) -> Option<bool> {
        match self.entries.get(&key) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn number(&self, key: ConnectionKey) -> Option<u64> {
        match self.entries.get(&key) {
            Some(ParamValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionKey, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the driver-string keywords as an ODBC connection string.
    ///
    /// Values containing `;`, `{`, `}` or surrounding whitespace are wrapped in
    /// braces, with `}` doubled.
    pub fn to_odbc_connection_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.iter() {
            let Some(keyword) = key.odbc_keyword() else {
                continue;
            };
            out.push_str(keyword);
            out.push('=');
            out.push_str(&quote_odbc_value(&value.to_string()));
            out.push(';');
        }
        out
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.iter() {
            if key.is_secret() {
                map.entry(&key, &"****");
            } else {
                map.entry(&key, value);
            }
        }
        map.finish()
    }
}

fn quote_odbc_value(value: &str) -> String {
    let needs_braces = value.contains([';', '{', '}'])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if needs_braces {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}
