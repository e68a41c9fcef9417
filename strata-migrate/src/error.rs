//! Error types for the migration engine.

use std::fmt;

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while planning or applying migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The history table does not exist in the store.
    #[error("The migration history table does not exist")]
    HistoryTableMissing,

    /// The store's ledger contains a migration the local timeline does not define,
    /// or the two orderings conflict.
    #[error("Migration '{id}' is recorded in the database but does not match the local migrations")]
    DivergedHistory {
        /// Ledger entry with no local counterpart.
        id: String,
    },

    /// The requested target is not part of the local timeline.
    #[error("Target migration '{0}' not found")]
    TargetMigrationNotFound(String),

    /// The differ could not order table creation around a foreign key cycle.
    #[error("Unresolvable foreign key cycle between tables: {}", tables.join(", "))]
    UnresolvableForeignKeyCycle {
        /// Tables participating in the cycle, ordinal order.
        tables: Vec<String>,
    },

    /// The dialect has neither a direct rendering nor a rebuild fallback for an operation.
    #[error("{dialect} does not support the {operation} operation")]
    DialectUnsupportedOperation {
        /// Dialect name.
        dialect: &'static str,
        /// Operation kind.
        operation: &'static str,
    },

    /// A batch failed while executing against the store.
    #[error("Batch {batch_index} failed executing `{statement}`: {source}")]
    StoreExecution {
        /// Zero-based index of the failed batch within the apply call.
        batch_index: usize,
        /// Statement text that failed.
        statement: String,
        /// Native store failure.
        #[source]
        source: StoreError,
    },

    /// A store call outside of batch execution failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A schema model violates its invariants.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A migration definition is malformed.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// Data loss would occur.
    #[error("Data loss would occur: {0}")]
    DataLoss(String),

    /// No changes to scaffold.
    #[error("No schema changes detected")]
    NoChanges,

    /// Apply was cancelled between batches.
    #[error("Migration cancelled after {completed_batches} committed batches")]
    Cancelled {
        /// Batches committed before cancellation was observed.
        completed_batches: usize,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrationError {
    /// Create an invalid schema error.
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// Create an invalid migration error.
    pub fn invalid_migration(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create a data loss error.
    pub fn data_loss(msg: impl Into<String>) -> Self {
        Self::DataLoss(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a diverged history error.
    pub fn diverged(id: impl Into<String>) -> Self {
        Self::DivergedHistory { id: id.into() }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(dialect: &'static str, operation: &'static str) -> Self {
        Self::DialectUnsupportedOperation { dialect, operation }
    }

    /// Check if this is a recoverable error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::HistoryTableMissing | Self::NoChanges | Self::Cancelled { .. })
    }

    /// Check if the underlying store failure is classified as transient.
    ///
    /// A retry layer above the migrator may re-invoke `apply`; the plan is
    /// recomputed from the ledger as it stands after the committed batches.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreExecution { source, .. } | Self::Store(source) => source.is_transient(),
            _ => false,
        }
    }
}

/// Transient-vs-permanent classification of a native store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Retrying the whole call may succeed (deadlock, busy, timeout, dropped connection).
    Transient,
    /// Retrying will not help.
    Permanent,
}

/// A failure reported by a store, already classified by its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// Classification.
    pub kind: StoreErrorKind,
    /// Native error number, when the backend exposes one.
    pub code: Option<i64>,
    /// Native error message.
    pub message: String,
}

impl StoreError {
    /// Create a transient store error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            code: None,
            message: message.into(),
        }
    }

    /// Create a permanent store error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Permanent,
            code: None,
            message: message.into(),
        }
    }

    /// Attach the native error number.
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Check if this error is transient.
    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::TargetMigrationNotFound("Foo".to_string());
        assert_eq!(err.to_string(), "Target migration 'Foo' not found");

        let err = MigrationError::diverged("000000000000002_Migration2");
        assert!(err.to_string().contains("000000000000002_Migration2"));
    }

    #[test]
    fn test_store_execution_display() {
        let err = MigrationError::StoreExecution {
            batch_index: 3,
            statement: "DROP TABLE [T];".to_string(),
            source: StoreError::permanent("Cannot drop the table").with_code(3701),
        };
        let msg = err.to_string();
        assert!(msg.contains("Batch 3"));
        assert!(msg.contains("DROP TABLE [T];"));
        assert!(msg.contains("code 3701"));
    }

    #[test]
    fn test_cycle_display() {
        let err = MigrationError::UnresolvableForeignKeyCycle {
            tables: vec!["A".to_string(), "B".to_string()],
        };
        assert!(err.to_string().ends_with("A, B"));
    }

    #[test]
    fn test_is_transient() {
        let err = MigrationError::StoreExecution {
            batch_index: 0,
            statement: String::new(),
            source: StoreError::transient("deadlock victim").with_code(1205),
        };
        assert!(err.is_transient());
        assert!(!MigrationError::HistoryTableMissing.is_transient());
        assert!(!MigrationError::Store(StoreError::permanent("syntax")).is_transient());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::HistoryTableMissing.is_recoverable());
        assert!(MigrationError::NoChanges.is_recoverable());
        assert!(!MigrationError::diverged("x").is_recoverable());
    }
}
