//! Migration history tracking.
//!
//! The history table is the ledger of migrations applied to a store. The
//! repository renders the SQL that maintains it; only
//! [`HistoryRepository::get_applied_migrations`] reads the live store.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HistoryConfig;
use crate::error::{MigrateResult, MigrationError};
use crate::executor::SchemaExecutor;
use crate::model::{Column, ColumnType, ObjectName, SchemaModel, Table};
use crate::operation::MigrationOperation;
use crate::sql::{Dialect, MigrationsSqlGenerator, SqlStatement};

/// Column holding the migration id.
pub const MIGRATION_ID_COLUMN: &str = "MigrationId";
/// Column holding the owning context key.
pub const CONTEXT_KEY_COLUMN: &str = "ContextKey";
/// Column holding the product version that applied the migration.
pub const PRODUCT_VERSION_COLUMN: &str = "ProductVersion";

const MIGRATION_ID_LENGTH: u32 = 150;
const CONTEXT_KEY_LENGTH: u32 = 300;
const PRODUCT_VERSION_LENGTH: u32 = 32;

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
    /// Migration id.
    pub migration_id: String,
    /// Owning context.
    pub context_key: String,
    /// Product version that applied the migration.
    pub product_version: String,
}

/// Renders and reads the history table.
#[derive(Debug, Clone)]
pub struct HistoryRepository {
    config: HistoryConfig,
    dialect: Dialect,
}

impl HistoryRepository {
    /// Create a repository for a dialect.
    pub fn new(config: HistoryConfig, dialect: Dialect) -> Self {
        Self { config, dialect }
    }

    /// Get the history settings.
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Get the dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn generator(&self) -> &'static dyn MigrationsSqlGenerator {
        self.dialect.generator()
    }

    /// The history table name.
    pub fn table_name(&self) -> ObjectName {
        ObjectName {
            schema: self.config.schema.clone(),
            name: self.config.table.clone(),
        }
    }

    /// The history table definition.
    pub fn table_definition(&self) -> Table {
        let name = self.table_name();
        let primary_key = format!("PK_{}", name.name);
        Table::new(name)
            .column(Column::new(MIGRATION_ID_COLUMN, ColumnType::varchar(MIGRATION_ID_LENGTH)))
            .column(Column::new(CONTEXT_KEY_COLUMN, ColumnType::varchar(CONTEXT_KEY_LENGTH)))
            .column(Column::new(
                PRODUCT_VERSION_COLUMN,
                ColumnType::varchar(PRODUCT_VERSION_LENGTH),
            ))
            .primary_key(primary_key, [MIGRATION_ID_COLUMN, CONTEXT_KEY_COLUMN])
    }

    /// A model holding only the history table.
    pub fn model(&self) -> MigrateResult<SchemaModel> {
        SchemaModel::builder().table(self.table_definition()).build()
    }

    /// Operations creating the history table.
    pub fn create_operations(&self) -> Vec<MigrationOperation> {
        vec![MigrationOperation::CreateTable {
            table: self.table_definition(),
        }]
    }

    /// Operations dropping the history table.
    pub fn drop_operations(&self) -> Vec<MigrationOperation> {
        vec![MigrationOperation::DropTable {
            name: self.table_name(),
        }]
    }

    /// SQL creating the history table.
    pub fn generate_create_sql(&self) -> MigrateResult<Vec<SqlStatement>> {
        self.generator()
            .generate(&self.create_operations(), &SchemaModel::empty())
    }

    /// SQL dropping the history table.
    pub fn generate_drop_sql(&self) -> MigrateResult<Vec<SqlStatement>> {
        self.generator()
            .generate(&self.drop_operations(), &self.model()?)
    }

    /// Whether the dialect can make statements conditional on the ledger.
    ///
    /// Only SQL Server scripts can branch; SQLite has no procedural `IF`.
    pub fn supports_guards(&self) -> bool {
        matches!(self.dialect, Dialect::SqlServer)
    }

    /// SQL dropping the history table only when no other context has rows in
    /// it, or `None` when the dialect cannot express the condition.
    pub fn generate_guarded_drop_sql(&self) -> MigrateResult<Option<Vec<SqlStatement>>> {
        if !self.supports_guards() {
            return Ok(None);
        }
        let generator = self.generator();
        let condition = format!(
            "NOT EXISTS (SELECT * FROM {} WHERE {} <> {})",
            generator.quote_table(&self.table_name()),
            generator.quote_identifier(CONTEXT_KEY_COLUMN),
            generator.string_literal(&self.config.context_key),
        );
        let body = self
            .generate_drop_sql()?
            .iter()
            .map(|s| format!("    {}", s.sql))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(vec![SqlStatement::new(format!(
            "IF {}\nBEGIN\n{}\nEND;",
            condition, body
        ))]))
    }

    /// Condition true while the history table does not exist.
    pub fn missing_table_condition(&self) -> String {
        let generator = self.generator();
        format!(
            "OBJECT_ID({}) IS NULL",
            generator.string_literal(&generator.quote_table(&self.table_name()))
        )
    }

    /// Condition true while the history table exists.
    pub fn existing_table_condition(&self) -> String {
        let generator = self.generator();
        format!(
            "OBJECT_ID({}) IS NOT NULL",
            generator.string_literal(&generator.quote_table(&self.table_name()))
        )
    }

    /// Condition true while this context records `migration_id` as applied.
    pub fn applied_condition(&self, migration_id: &str) -> String {
        let generator = self.generator();
        format!(
            "EXISTS (SELECT * FROM {} WHERE {} = {} AND {} = {})",
            generator.quote_table(&self.table_name()),
            generator.quote_identifier(MIGRATION_ID_COLUMN),
            generator.string_literal(migration_id),
            generator.quote_identifier(CONTEXT_KEY_COLUMN),
            generator.string_literal(&self.config.context_key),
        )
    }

    /// Condition true while this context has not applied `migration_id`.
    pub fn unapplied_condition(&self, migration_id: &str) -> String {
        format!("NOT {}", self.applied_condition(migration_id))
    }

    /// Run `statement` only while `condition` holds.
    ///
    /// The statement is deferred through `EXEC` so a script still compiles
    /// when it references objects an earlier guarded block would create.
    pub fn guard(&self, condition: &str, statement: &SqlStatement) -> MigrateResult<SqlStatement> {
        if !self.supports_guards() {
            return Err(MigrationError::unsupported(self.dialect.name(), "IdempotentScript"));
        }
        let text = statement.sql.trim_end_matches(['\n', '\r', ';']);
        let sql = format!(
            "IF {}\nBEGIN\n    EXEC({});\nEND;",
            condition,
            self.generator().string_literal(text)
        );
        Ok(SqlStatement {
            sql,
            suppress_transaction: statement.suppress_transaction,
        })
    }

    /// SQL recording `migration_id` as applied for this context.
    pub fn generate_insert_sql(&self, migration_id: &str) -> SqlStatement {
        let generator = self.generator();
        SqlStatement::new(format!(
            "INSERT INTO {} ({}) VALUES ({}, {}, {});",
            generator.quote_table(&self.table_name()),
            generator.column_list(&[
                MIGRATION_ID_COLUMN.to_string(),
                CONTEXT_KEY_COLUMN.to_string(),
                PRODUCT_VERSION_COLUMN.to_string(),
            ]),
            generator.string_literal(migration_id),
            generator.string_literal(&self.config.context_key),
            generator.string_literal(&self.config.product_version),
        ))
    }

    /// SQL removing the record of `migration_id` for this context.
    pub fn generate_delete_sql(&self, migration_id: &str) -> SqlStatement {
        let generator = self.generator();
        SqlStatement::new(format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {};",
            generator.quote_table(&self.table_name()),
            generator.quote_identifier(MIGRATION_ID_COLUMN),
            generator.string_literal(migration_id),
            generator.quote_identifier(CONTEXT_KEY_COLUMN),
            generator.string_literal(&self.config.context_key),
        ))
    }

    /// SQL selecting this context's rows in ledger order.
    pub fn select_sql(&self) -> String {
        let generator = self.generator();
        format!(
            "SELECT {} FROM {} WHERE {} = {} ORDER BY {};",
            generator.column_list(&[
                MIGRATION_ID_COLUMN.to_string(),
                CONTEXT_KEY_COLUMN.to_string(),
                PRODUCT_VERSION_COLUMN.to_string(),
            ]),
            generator.quote_table(&self.table_name()),
            generator.quote_identifier(CONTEXT_KEY_COLUMN),
            generator.string_literal(&self.config.context_key),
            generator.quote_identifier(MIGRATION_ID_COLUMN),
        )
    }

    /// SQL listing the contexts other than this one with rows in the table.
    pub fn other_contexts_sql(&self) -> String {
        let generator = self.generator();
        format!(
            "SELECT DISTINCT {} FROM {} WHERE {} <> {};",
            generator.quote_identifier(CONTEXT_KEY_COLUMN),
            generator.quote_table(&self.table_name()),
            generator.quote_identifier(CONTEXT_KEY_COLUMN),
            generator.string_literal(&self.config.context_key),
        )
    }

    /// Check whether other contexts still record migrations in the table.
    pub async fn has_other_contexts(&self, executor: &dyn SchemaExecutor) -> MigrateResult<bool> {
        let rows = executor.query(&self.other_contexts_sql()).await?;
        let others = rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .filter(|key| *key != self.config.context_key)
            .count();
        debug!(table = %self.table_name(), others, "Checked history for other contexts");
        Ok(others > 0)
    }

    /// Check whether the history table exists.
    pub async fn exists(&self, executor: &dyn SchemaExecutor) -> MigrateResult<bool> {
        Ok(executor.table_exists(&self.table_name()).await?)
    }

    /// Read this context's applied migrations, ordered ordinally by id.
    ///
    /// Fails with [`MigrationError::HistoryTableMissing`] when the table does
    /// not exist; an existing empty table yields an empty list.
    pub async fn get_applied_migrations(
        &self,
        executor: &dyn SchemaExecutor,
    ) -> MigrateResult<Vec<HistoryRow>> {
        if !self.exists(executor).await? {
            return Err(MigrationError::HistoryTableMissing);
        }

        let rows = executor.query(&self.select_sql()).await?;
        let mut applied = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = row.into_iter();
            let Some(Some(migration_id)) = values.next() else {
                return Err(MigrationError::invalid_migration(format!(
                    "history table {} contains a row without a migration id",
                    self.table_name()
                )));
            };
            let context_key = values.next().flatten().unwrap_or_default();
            let product_version = values.next().flatten().unwrap_or_default();
            if context_key != self.config.context_key {
                continue;
            }
            applied.push(HistoryRow {
                migration_id,
                context_key,
                product_version,
            });
        }
        applied.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));

        debug!(
            table = %self.table_name(),
            applied = applied.len(),
            "Loaded migration history"
        );
        Ok(applied)
    }
}
