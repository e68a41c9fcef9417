//! SQL Server implementation of [`SchemaExecutor`].

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use strata_migrate::{
    BatchFailure, Dialect, Existence, IsolationLevel, ObjectName, Row, SchemaExecutor, SqlBatch,
    StoreError,
};
use tiberius::{Client, ColumnData};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{MssqlResult, classify};

const DEFAULT_SCHEMA: &str = "dbo";

struct Session<S: AsyncRead + AsyncWrite + Unpin + Send> {
    client: Client<S>,
    /// Whether `USE` has been issued for the target database.
    selected: bool,
}

/// Runs migration batches on one SQL Server connection.
///
/// The client may be connected to any database on the server (typically
/// `master` when the target does not exist yet); the executor switches to
/// the target database before touching it.
pub struct MssqlExecutor<S: AsyncRead + AsyncWrite + Unpin + Send> {
    session: Mutex<Session<S>>,
    database: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> MssqlExecutor<S> {
    /// Wrap a connected client targeting `database`.
    pub fn new(client: Client<S>, database: impl Into<String>) -> Self {
        Self {
            session: Mutex::new(Session {
                client,
                selected: false,
            }),
            database: database.into(),
        }
    }

    /// Get the target database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Release the client.
    pub fn into_inner(self) -> Client<S> {
        self.session.into_inner().client
    }

    async fn select_database(&self, session: &mut Session<S>) -> MssqlResult<()> {
        if !session.selected {
            let sql = format!("USE {};", quote_identifier(&self.database));
            session.client.simple_query(sql).await?.into_results().await?;
            session.selected = true;
        }
        Ok(())
    }
}

fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn isolation_sql(level: IsolationLevel) -> &'static str {
    match level {
        IsolationLevel::ReadCommitted => {
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED; BEGIN TRANSACTION;"
        }
        IsolationLevel::Serializable => {
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE; BEGIN TRANSACTION;"
        }
    }
}

fn render_value(value: ColumnData<'static>) -> Option<String> {
    match value {
        ColumnData::U8(v) => v.map(|v| v.to_string()),
        ColumnData::I16(v) => v.map(|v| v.to_string()),
        ColumnData::I32(v) => v.map(|v| v.to_string()),
        ColumnData::I64(v) => v.map(|v| v.to_string()),
        ColumnData::F32(v) => v.map(|v| v.to_string()),
        ColumnData::F64(v) => v.map(|v| v.to_string()),
        ColumnData::Bit(v) => v.map(|v| if v { "1" } else { "0" }.to_string()),
        ColumnData::String(v) => v.map(|v| v.into_owned()),
        ColumnData::Guid(v) => v.map(|v| v.to_string()),
        ColumnData::Numeric(v) => v.map(|v| v.to_string()),
        ColumnData::Binary(v) => v.map(|v| String::from_utf8_lossy(&v).into_owned()),
        other => Some(format!("{:?}", other)),
    }
}

#[async_trait]
impl<S> SchemaExecutor for MssqlExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn database_exists(&self) -> Result<Existence, StoreError> {
        let mut session = self.session.lock().await;
        let rows = session
            .client
            .query("SELECT DB_ID(@P1);", &[&self.database.as_str()])
            .await
            .map_err(|e| classify(&e))?
            .into_first_result()
            .await
            .map_err(|e| classify(&e))?;
        let exists = rows
            .first()
            .and_then(|row| row.try_get::<i32, _>(0).ok().flatten())
            .is_some();
        Ok(exists.into())
    }

    async fn create_database(&self) -> Result<(), StoreError> {
        let mut session = self.session.lock().await;
        let sql = format!("CREATE DATABASE {};", quote_identifier(&self.database));
        debug!(database = %self.database, "Creating database");
        session
            .client
            .simple_query(sql)
            .await
            .map_err(|e| classify(&e))?
            .into_results()
            .await
            .map_err(|e| classify(&e))?;
        session.selected = false;
        Ok(())
    }

    async fn table_exists(&self, table: &ObjectName) -> Result<bool, StoreError> {
        let mut session = self.session.lock().await;
        self.select_database(&mut session).await?;
        let qualified = format!(
            "{}.{}",
            quote_identifier(table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)),
            quote_identifier(&table.name)
        );
        let rows = session
            .client
            .query("SELECT OBJECT_ID(@P1, N'U');", &[&qualified.as_str()])
            .await
            .map_err(|e| classify(&e))?
            .into_first_result()
            .await
            .map_err(|e| classify(&e))?;
        Ok(rows
            .first()
            .and_then(|row| row.try_get::<i32, _>(0).ok().flatten())
            .is_some())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let mut session = self.session.lock().await;
        self.select_database(&mut session).await?;
        debug!(sql = %sql, "Executing query");
        let rows = session
            .client
            .simple_query(sql)
            .await
            .map_err(|e| classify(&e))?
            .into_first_result()
            .await
            .map_err(|e| classify(&e))?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(render_value).collect())
            .collect())
    }

    async fn execute_batch(&self, batch: &SqlBatch) -> Result<u64, BatchFailure> {
        let mut session = self.session.lock().await;
        self.select_database(&mut session)
            .await
            .map_err(|e| BatchFailure::new(0, e.into()))?;

        let Some(isolation) = batch.isolation else {
            for (index, statement) in batch.statements.iter().enumerate() {
                trace!(sql = %statement.sql, "Executing statement outside a transaction");
                let result = match session.client.simple_query(statement.sql.as_str()).await {
                    Ok(stream) => stream.into_results().await.map(|_| ()),
                    Err(e) => Err(e),
                };
                result.map_err(|e| BatchFailure::new(index, classify(&e)))?;
            }
            return Ok(0);
        };

        session
            .client
            .simple_query(isolation_sql(isolation))
            .await
            .map_err(|e| BatchFailure::new(0, classify(&e)))?
            .into_results()
            .await
            .map_err(|e| BatchFailure::new(0, classify(&e)))?;

        let mut affected = 0u64;
        for (index, statement) in batch.statements.iter().enumerate() {
            trace!(sql = %statement.sql, "Executing statement");
            match session.client.execute(statement.sql.as_str(), &[]).await {
                Ok(result) => affected += result.total(),
                Err(e) => {
                    warn!(statement = index, error = %e, "Batch failed, rolling back");
                    let rollback = session
                        .client
                        .simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;")
                        .await;
                    if let Ok(stream) = rollback {
                        let _ = stream.into_results().await;
                    }
                    return Err(BatchFailure::new(index, classify(&e)));
                }
            }
        }

        session
            .client
            .simple_query("COMMIT TRANSACTION;")
            .await
            .map_err(|e| BatchFailure::new(batch.statements.len(), classify(&e)))?
            .into_results()
            .await
            .map_err(|e| BatchFailure::new(batch.statements.len(), classify(&e)))?;

        debug!(statements = batch.statements.len(), affected, "Committed batch");
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("Blogging"), "[Blogging]");
        assert_eq!(quote_identifier("a]b"), "[a]]b]");
    }

    #[test]
    fn test_isolation_sql() {
        assert!(isolation_sql(IsolationLevel::Serializable).contains("SERIALIZABLE"));
        assert!(isolation_sql(IsolationLevel::ReadCommitted).contains("READ COMMITTED"));
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(ColumnData::I32(Some(7))), Some("7".to_string()));
        assert_eq!(render_value(ColumnData::I32(None)), None);
        assert_eq!(
            render_value(ColumnData::String(Some(Cow::Borrowed("20240101000000_Init")))),
            Some("20240101000000_Init".to_string())
        );
        assert_eq!(render_value(ColumnData::Bit(Some(true))), Some("1".to_string()));
    }
}
