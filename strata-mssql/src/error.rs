//! Error types for Microsoft SQL Server operations.

use strata_migrate::StoreError;
use thiserror::Error;

/// Result type for MSSQL operations.
pub type MssqlResult<T> = Result<T, MssqlError>;

/// Errors that can occur during MSSQL operations.
#[derive(Error, Debug)]
pub enum MssqlError {
    /// Tiberius/SQL Server error.
    #[error("sql server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MssqlError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<MssqlError> for StoreError {
    fn from(err: MssqlError) -> Self {
        match err {
            MssqlError::SqlServer(e) => classify(&e),
            MssqlError::Config(msg) => StoreError::permanent(msg),
        }
    }
}

/// Server error numbers worth retrying.
///
/// Deadlock victim, lock request timeout, database unavailable, Azure SQL
/// throttling and reconfiguration.
const TRANSIENT_CODES: &[u32] = &[
    1205, 1222, 4060, 4221, 10928, 10929, 40197, 40501, 40613, 49918, 49919, 49920,
];

/// Check whether a server error number is transient.
pub fn is_transient_code(code: u32) -> bool {
    TRANSIENT_CODES.contains(&code)
}

/// Classify a driver error as transient or permanent.
///
/// Server errors are classified by number; I/O failures and routing
/// redirects are transient.
pub fn classify(err: &tiberius::error::Error) -> StoreError {
    use tiberius::error::Error;

    match err {
        Error::Server(token) => {
            let store = if is_transient_code(token.code()) {
                StoreError::transient(token.message())
            } else {
                StoreError::permanent(token.message())
            };
            store.with_code(i64::from(token.code()))
        }
        Error::Io { .. } | Error::Routing { .. } => StoreError::transient(err.to_string()),
        _ => StoreError::permanent(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_transient_codes() {
        assert!(is_transient_code(1205));
        assert!(is_transient_code(40613));
        assert!(!is_transient_code(2714));
        assert!(!is_transient_code(547));
    }

    #[test]
    fn test_io_is_transient() {
        let err = tiberius::error::Error::from(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert!(classify(&err).is_transient());
    }

    #[test]
    fn test_conversion_is_permanent() {
        let err = tiberius::error::Error::Conversion("bad value".into());
        assert!(!classify(&err).is_transient());
    }

    #[test]
    fn test_config_error() {
        let err: StoreError = MssqlError::config("missing database").into();
        assert!(!err.is_transient());
        assert!(MssqlError::config("x").to_string().contains("configuration error"));
    }
}
