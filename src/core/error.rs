use rusqlite;
use std::io;
use thiserror::Error;

/// How the message layer should settle a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Redeliver later; nothing partial was committed.
    Transient,
    /// Retrying cannot fix it; route to the dead-letter table.
    Permanent,
}

#[derive(Error, Debug)]
pub enum FinalizerError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invocation {includer} includes {included}, which does not exist")]
    MissingInclusion { includer: String, included: String },
    #[error("Corrupt record for {id}: {detail}")]
    CorruptRecord { id: String, detail: String },
    #[error("Export failed: {0}")]
    ExportError(String),
}

impl FinalizerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FinalizerError::RusqliteError(err) => sqlite_error_class(err),
            FinalizerError::IoError(_) | FinalizerError::ExportError(_) => ErrorClass::Transient,
            FinalizerError::SerdeError(_)
            | FinalizerError::ConfigError(_)
            | FinalizerError::ValidationError(_)
            | FinalizerError::NotFound(_)
            | FinalizerError::MissingInclusion { .. }
            | FinalizerError::CorruptRecord { .. } => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Store unavailability and contention are transient; rows that cannot be
/// decoded are not.
fn sqlite_error_class(err: &rusqlite::Error) -> ErrorClass {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => match code.code {
            rusqlite::ErrorCode::ConstraintViolation
            | rusqlite::ErrorCode::TypeMismatch
            | rusqlite::ErrorCode::DatabaseCorrupt
            | rusqlite::ErrorCode::NotADatabase => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => ErrorClass::Permanent,
        _ => ErrorClass::Transient,
    }
}
