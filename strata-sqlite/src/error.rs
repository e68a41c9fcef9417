//! Error types for SQLite operations.

use rusqlite::ErrorCode;
use strata_migrate::StoreError;
use thiserror::Error;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite driver error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SqliteError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<SqliteError> for StoreError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Sqlite(e) => classify_call(&e),
            SqliteError::Config(msg) => StoreError::permanent(msg),
        }
    }
}

/// Classify a driver error as transient or permanent.
///
/// A busy or locked database is transient; everything else is permanent.
pub fn classify(err: &rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            let store = match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    StoreError::transient(err.to_string())
                }
                _ => StoreError::permanent(err.to_string()),
            };
            store.with_code(i64::from(failure.extended_code))
        }
        _ => StoreError::permanent(err.to_string()),
    }
}

/// Classify an error returned by a connection call.
pub(crate) fn classify_call(err: &tokio_rusqlite::Error) -> StoreError {
    match err {
        tokio_rusqlite::Error::Rusqlite(e) => classify(e),
        other => StoreError::permanent(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::ffi;

    use super::*;

    fn failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some("failure".to_string()))
    }

    #[test]
    fn test_busy_and_locked_are_transient() {
        assert!(classify(&failure(ffi::SQLITE_BUSY)).is_transient());
        assert!(classify(&failure(ffi::SQLITE_LOCKED)).is_transient());
    }

    #[test]
    fn test_constraint_is_permanent() {
        let err = classify(&failure(ffi::SQLITE_CONSTRAINT));
        assert!(!err.is_transient());
        assert_eq!(err.code, Some(i64::from(ffi::SQLITE_CONSTRAINT)));
    }

    #[test]
    fn test_conversion_to_store_error() {
        let err: StoreError = SqliteError::config("bad path").into();
        assert!(!err.is_transient());
        assert_eq!(err.message, "bad path");

        let err: StoreError = SqliteError::from(failure(ffi::SQLITE_BUSY)).into();
        assert!(err.is_transient());
    }
}
