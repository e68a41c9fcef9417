//! Store capability consumed by the migrator.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::ObjectName;
use crate::sql::{Dialect, SqlStatement};

/// Answer of an existence check that reached the store.
///
/// A check that could not get an answer is not a third variant: it surfaces
/// as `Err(StoreError)`, with [`StoreErrorKind::Transient`] when a retry may
/// succeed.
///
/// [`StoreErrorKind::Transient`]: crate::error::StoreErrorKind::Transient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Existence {
    /// The object exists.
    Exists,
    /// The object does not exist.
    DoesNotExist,
}

impl Existence {
    /// Check whether the object exists.
    pub fn exists(self) -> bool {
        self == Self::Exists
    }
}

impl From<bool> for Existence {
    fn from(exists: bool) -> Self {
        if exists { Self::Exists } else { Self::DoesNotExist }
    }
}

/// Transaction isolation level for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Read committed.
    ReadCommitted,
    /// Serializable.
    #[default]
    Serializable,
}

/// Statements executed as one unit.
///
/// A batch with an isolation level runs inside a single transaction that is
/// committed when every statement succeeds and rolled back otherwise. A batch
/// without one holds a single statement that runs on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBatch {
    /// Statements in order.
    pub statements: Vec<SqlStatement>,
    /// Isolation level of the enclosing transaction, `None` for no transaction.
    pub isolation: Option<IsolationLevel>,
}

impl SqlBatch {
    /// A transactional batch.
    pub fn transactional(statements: Vec<SqlStatement>, isolation: IsolationLevel) -> Self {
        Self {
            statements,
            isolation: Some(isolation),
        }
    }

    /// A single statement outside any transaction.
    pub fn standalone(statement: SqlStatement) -> Self {
        Self {
            statements: vec![statement],
            isolation: None,
        }
    }

    /// Check whether the batch runs in a transaction.
    pub fn is_transactional(&self) -> bool {
        self.isolation.is_some()
    }
}

/// Split statements into batches.
///
/// Consecutive statements share a transaction; a statement flagged
/// `suppress_transaction` flushes the pending batch and runs alone.
pub fn partition(statements: Vec<SqlStatement>, isolation: IsolationLevel) -> Vec<SqlBatch> {
    let mut batches = Vec::new();
    let mut pending = Vec::new();
    for statement in statements {
        if statement.suppress_transaction {
            if !pending.is_empty() {
                batches.push(SqlBatch::transactional(std::mem::take(&mut pending), isolation));
            }
            batches.push(SqlBatch::standalone(statement));
        } else {
            pending.push(statement);
        }
    }
    if !pending.is_empty() {
        batches.push(SqlBatch::transactional(pending, isolation));
    }
    batches
}

/// A failed batch: the statement that failed and the store error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Index of the failing statement within the batch.
    pub statement_index: usize,
    /// Classified store error.
    pub error: StoreError,
}

impl BatchFailure {
    /// Create a batch failure.
    pub fn new(statement_index: usize, error: StoreError) -> Self {
        Self {
            statement_index,
            error,
        }
    }
}

/// One row of a query result, each column rendered as text.
pub type Row = Vec<Option<String>>;

/// A live store the migrator can inspect and change.
///
/// Implementations hold a single connection; the migrator never issues calls
/// concurrently.
#[async_trait]
pub trait SchemaExecutor: Send + Sync {
    /// Dialect of the store.
    fn dialect(&self) -> Dialect;

    /// Check whether the target database exists.
    ///
    /// Answers [`Existence::DoesNotExist`] only when the store says so. A
    /// server that is unreachable or still starting yields a transient
    /// [`StoreError`] instead, and callers stop before creating anything.
    async fn database_exists(&self) -> Result<Existence, StoreError>;

    /// Create the target database.
    async fn create_database(&self) -> Result<(), StoreError>;

    /// Check whether a table exists.
    async fn table_exists(&self, table: &ObjectName) -> Result<bool, StoreError>;

    /// Run a query and return its rows.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError>;

    /// Execute a batch, returning the total rows affected.
    async fn execute_batch(&self, batch: &SqlBatch) -> Result<u64, BatchFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(sql: &str, suppress: bool) -> SqlStatement {
        SqlStatement {
            sql: sql.to_string(),
            suppress_transaction: suppress,
        }
    }

    fn shape(batches: &[SqlBatch]) -> Vec<Vec<&str>> {
        batches
            .iter()
            .map(|b| b.statements.iter().map(|s| s.sql.as_str()).collect())
            .collect()
    }

    #[test]
    fn test_partition_splits_on_suppressed_statements() {
        let statements = vec![
            statement("1", true),
            statement("2", false),
            statement("3", false),
            statement("4", true),
            statement("5", false),
            statement("6", false),
            statement("7", true),
            statement("insert", false),
        ];
        let batches = partition(statements, IsolationLevel::Serializable);
        assert_eq!(
            shape(&batches),
            vec![
                vec!["1"],
                vec!["2", "3"],
                vec!["4"],
                vec!["5", "6"],
                vec!["7"],
                vec!["insert"],
            ]
        );
        assert!(!batches[0].is_transactional());
        assert_eq!(batches[1].isolation, Some(IsolationLevel::Serializable));
        assert!(!batches[4].is_transactional());
        assert!(batches[5].is_transactional());
    }

    #[test]
    fn test_partition_empty() {
        assert!(partition(Vec::new(), IsolationLevel::Serializable).is_empty());
    }

    #[test]
    fn test_existence_from_bool() {
        assert!(Existence::from(true).exists());
        assert_eq!(Existence::from(false), Existence::DoesNotExist);
    }
}
