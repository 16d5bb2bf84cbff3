use std::fmt;

use crate::model::EntityKind;

#[derive(Debug)]
pub enum ReconError {
    /// The fetch step failed. Nothing was written for this run.
    Fetch { source: String, table: String, message: String },
    /// The record store rejected a read or write.
    Store(StoreError),
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (empty table name, unknown format, etc.).
    ConfigValidation(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch { source, table, message } => {
                write!(f, "fetch failed for source '{source}' (table '{table}'): {message}")
            }
            Self::Store(e) => write!(f, "record store error: {e}"),
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ReconError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[derive(Debug)]
pub enum StoreError {
    /// Backend IO failure (SQLite, filesystem).
    Io(String),
    /// A value's type disagrees with the stored one and typecast was off.
    TypeMismatch { table: String, id: String, field: String },
    /// A stored row could not be decoded.
    Corrupt { table: String, id: String, message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::TypeMismatch { table, id, field } => {
                write!(f, "table '{table}', record '{id}': type mismatch on field '{field}'")
            }
            Self::Corrupt { table, id, message } => {
                write!(f, "table '{table}', record '{id}': corrupt row: {message}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Raised by a fetch collaborator. Any failure invalidates the whole batch.
#[derive(Debug, Clone)]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FetchError {}

/// Row-scoped mapping failure. The row is skipped, the run continues.
#[derive(Debug, Clone, PartialEq)]
pub enum MapError {
    /// A field the mapper requires is absent or empty.
    MissingField(String),
    /// A field is present but has an unusable shape.
    InvalidField { field: String, message: String },
    /// The payload is not an object.
    NotAnObject,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field '{field}'"),
            Self::InvalidField { field, message } => write!(f, "field '{field}': {message}"),
            Self::NotAnObject => write!(f, "payload is not an object"),
        }
    }
}

impl std::error::Error for MapError {}

/// Record-scoped foreign-key rewrite failure during promotion.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteError {
    pub kind: EntityKind,
    pub id: String,
    pub field: String,
    pub message: String,
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}': cannot rewrite '{}': {}",
            self.kind, self.id, self.field, self.message
        )
    }
}

impl std::error::Error for RewriteError {}
