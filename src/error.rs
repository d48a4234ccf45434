//! Error types for the adapter

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors returned by [`crate::AsyncSqlite`]
#[derive(Error, Debug)]
pub enum SqliteError {
    /// A call was made before `open` or after `close`
    #[error("database is not opened")]
    NotOpened,

    /// `open` was called while a handle already exists
    #[error("database is already opened: {0}")]
    AlreadyOpened(String),

    /// Error reported by the SQLite engine, message kept verbatim
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// The background connection thread has stopped
    #[error("connection closed")]
    ConnectionClosed,

    /// A row could not be converted into the requested type
    #[error("failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SqliteError {
    /// Primary SQLite result code, when the engine produced this error
    pub fn sqlite_error_code(&self) -> Option<ErrorCode> {
        match self {
            SqliteError::Sqlite(err) => err.sqlite_error_code(),
            _ => None,
        }
    }

    /// True for primary key, unique, not-null and foreign key failures
    pub fn is_constraint_violation(&self) -> bool {
        self.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
    }
}

impl<E> From<tokio_rusqlite::Error<E>> for SqliteError
where
    E: Into<SqliteError>,
{
    fn from(err: tokio_rusqlite::Error<E>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(inner) => inner.into(),
            tokio_rusqlite::Error::Close((_, inner)) => SqliteError::Sqlite(inner),
            _ => SqliteError::ConnectionClosed,
        }
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, SqliteError>;
