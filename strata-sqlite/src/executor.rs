//! SQLite implementation of [`SchemaExecutor`].

use std::path::Path;

use async_trait::async_trait;
use rusqlite::TransactionBehavior;
use rusqlite::types::ValueRef;
use strata_migrate::{
    BatchFailure, Dialect, Existence, ObjectName, Row, SchemaExecutor, SqlBatch, StoreError,
};
use tokio_rusqlite::Connection;
use tracing::{debug, trace, warn};

use crate::error::{SqliteResult, classify, classify_call};

/// Connection settings applied on open.
///
/// Table rebuilds rename a table aside and recreate it; with legacy rename
/// semantics the foreign keys of other tables keep pointing at the original
/// name, and enforcement stays off while rows are copied.
const MIGRATION_PRAGMAS: &str = "PRAGMA foreign_keys = OFF;\nPRAGMA legacy_alter_table = ON;";

/// Runs migration batches on one SQLite connection.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::from_connection(conn).await
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::from_connection(conn).await
    }

    /// Wrap an open connection, applying the migration settings.
    pub async fn from_connection(conn: Connection) -> SqliteResult<Self> {
        conn.call(|conn| Ok(conn.execute_batch(MIGRATION_PRAGMAS)?))
            .await?;
        debug!("Opened SQLite schema executor");
        Ok(Self { conn })
    }

    /// Get the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn total_changes(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    let total: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
    Ok(total.max(0) as u64)
}

fn render_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

#[async_trait]
impl SchemaExecutor for SqliteExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    /// Opening a connection creates the database file, so it always exists.
    async fn database_exists(&self) -> Result<Existence, StoreError> {
        Ok(Existence::Exists)
    }

    async fn create_database(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn table_exists(&self, table: &ObjectName) -> Result<bool, StoreError> {
        if table.schema.is_some() {
            warn!(table = %table, "SQLite does not support schemas; ignoring the schema qualifier");
        }
        let name = table.name.clone();
        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&name],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(|e| classify_call(&e))
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing query");
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let width = stmt.column_count();
                let rows = stmt.query_map([], |row| {
                    let mut values = Vec::with_capacity(width);
                    for i in 0..width {
                        values.push(render_value(row.get_ref(i)?));
                    }
                    Ok(values)
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(|e| classify_call(&e))
    }

    async fn execute_batch(&self, batch: &SqlBatch) -> Result<u64, BatchFailure> {
        let statements: Vec<String> = batch.statements.iter().map(|s| s.sql.clone()).collect();
        let transactional = batch.is_transactional();

        let outcome = self
            .conn
            .call(move |conn| {
                let before = total_changes(conn)?;
                if !transactional {
                    for (index, sql) in statements.iter().enumerate() {
                        trace!(sql = %sql, "Executing statement");
                        if let Err(e) = conn.execute_batch(sql) {
                            return Ok(Err((index, e)));
                        }
                    }
                    return Ok(Ok(total_changes(conn)?.saturating_sub(before)));
                }

                // SQLite transactions are serializable; IMMEDIATE takes the
                // write lock up front.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                for (index, sql) in statements.iter().enumerate() {
                    trace!(sql = %sql, "Executing statement");
                    if let Err(e) = tx.execute_batch(sql) {
                        tx.rollback()?;
                        return Ok(Err((index, e)));
                    }
                }
                let affected = total_changes(&tx)?.saturating_sub(before);
                tx.commit()?;
                Ok(Ok(affected))
            })
            .await;

        match outcome {
            Ok(Ok(affected)) => {
                debug!(statements = batch.statements.len(), affected, "Committed batch");
                Ok(affected)
            }
            Ok(Err((index, e))) => {
                warn!(statement = index, error = %e, "Batch failed");
                Err(BatchFailure::new(index, classify(&e)))
            }
            Err(e) => Err(BatchFailure::new(0, classify_call(&e))),
        }
    }
}
