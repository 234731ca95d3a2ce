//! Error types for the SQLite backend

use sidetable_core::AttributeError;
use thiserror::Error;

/// SQLite backend error type
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Database connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Schema/migration error
    #[error("schema error: {0}")]
    Schema(String),

    /// Attribute value failed to encode to or decode from JSON
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Uniqueness constraint violation on (modelable_id, modelable_type, key)
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Underlying rusqlite error
    #[error("SQLite error: {0}")]
    Rusqlite(rusqlite::Error),
}

/// Result type for SQLite backend operations
pub type SqliteResult<T> = Result<T, SqliteError>;

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Constraint(err.to_string())
            }
            _ => Self::Rusqlite(err),
        }
    }
}

impl From<SqliteError> for AttributeError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Connection(msg) => Self::Backend(msg),
            SqliteError::Schema(msg) => Self::Backend(msg),
            SqliteError::Serialization(msg) => Self::Serialization(msg),
            SqliteError::Constraint(msg) => Self::Constraint(msg),
            SqliteError::Rusqlite(e) => Self::Backend(e.to_string()),
        }
    }
}
