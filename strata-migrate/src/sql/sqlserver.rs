//! SQL Server migration SQL.

use tracing::debug;

use super::{MigrationsSqlGenerator, SqlStatement, escape};
use crate::error::MigrateResult;
use crate::model::{Column, ColumnType, ForeignKey, Index, ObjectName, SchemaModel, Sequence, Table};
use crate::operation::MigrationOperation;

const DEFAULT_SCHEMA: &str = "dbo";

/// SQL generator for Microsoft SQL Server.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerGenerator;

impl MigrationsSqlGenerator for SqlServerGenerator {
    fn name(&self) -> &'static str {
        "SqlServer"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", escape(name, ']'))
    }

    fn quote_table(&self, name: &ObjectName) -> String {
        match &name.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&name.name)
            ),
            None => self.quote_identifier(&name.name),
        }
    }

    fn string_literal(&self, value: &str) -> String {
        format!("N'{}'", escape(value, '\''))
    }

    fn generate(
        &self,
        operations: &[MigrationOperation],
        source: &SchemaModel,
    ) -> MigrateResult<Vec<SqlStatement>> {
        let mut model = source.clone();
        let mut statements = Vec::new();
        for operation in operations {
            self.render(operation, &model, &mut statements)?;
            operation.apply_to(&mut model)?;
        }
        debug!(
            operations = operations.len(),
            statements = statements.len(),
            "Generated SqlServer migration SQL"
        );
        Ok(statements)
    }
}

impl SqlServerGenerator {
    fn render(
        &self,
        operation: &MigrationOperation,
        model: &SchemaModel,
        out: &mut Vec<SqlStatement>,
    ) -> MigrateResult<()> {
        match operation {
            MigrationOperation::CreateTable { table } => {
                if let Some(schema) = &table.name.schema {
                    out.push(self.ensure_schema(schema));
                }
                out.push(SqlStatement::new(self.create_table(table)));
                for index in &table.indexes {
                    out.push(SqlStatement::new(self.create_index(&table.name, index)));
                }
            }
            MigrationOperation::DropTable { name } => {
                out.push(SqlStatement::new(format!("DROP TABLE {};", self.quote_table(name))));
            }
            MigrationOperation::RenameTable { name, new_name } => {
                let renamed = name.with_name(new_name.clone());
                out.push(SqlStatement::new(format!(
                    "EXEC sp_rename {}, {};",
                    self.string_literal(&self.quote_table(name)),
                    self.string_literal(new_name)
                )));
                // Default constraint names embed the table name.
                let table = model.require_table(name)?;
                for column in table.columns.iter().filter(|c| c.default.is_some()) {
                    out.push(SqlStatement::new(format!(
                        "EXEC sp_rename {}, {}, N'OBJECT';",
                        self.string_literal(&self.qualified_object(
                            &renamed,
                            &default_constraint_name(name, &column.name)
                        )),
                        self.string_literal(&default_constraint_name(&renamed, &column.name))
                    )));
                }
            }
            MigrationOperation::MoveTableToSchema { name, new_schema } => {
                let schema = new_schema.as_deref().unwrap_or(DEFAULT_SCHEMA);
                out.push(self.ensure_schema(schema));
                out.push(SqlStatement::new(format!(
                    "ALTER SCHEMA {} TRANSFER {};",
                    self.quote_identifier(schema),
                    self.quote_table(&name.with_schema(Some(
                        name.schema.clone().unwrap_or_else(|| DEFAULT_SCHEMA.to_string())
                    )))
                )));
            }
            MigrationOperation::AddColumn { table, column } => {
                out.push(SqlStatement::new(format!(
                    "ALTER TABLE {} ADD {};",
                    self.quote_table(table),
                    self.column_definition(table, column)
                )));
            }
            MigrationOperation::DropColumn { table, column } => {
                let existing = model.require_table(table)?.find_column(column);
                if existing.is_some_and(|c| c.default.is_some()) {
                    out.push(self.drop_default(table, column));
                }
                out.push(SqlStatement::new(format!(
                    "ALTER TABLE {} DROP COLUMN {};",
                    self.quote_table(table),
                    self.quote_identifier(column)
                )));
            }
            MigrationOperation::AlterColumn {
                table,
                column,
                old_column,
            } => {
                if old_column.default.is_some() {
                    out.push(self.drop_default(table, &column.name));
                }
                out.push(SqlStatement::new(format!(
                    "ALTER TABLE {} ALTER COLUMN {} {} {};",
                    self.quote_table(table),
                    self.quote_identifier(&column.name),
                    self.column_type(&column.column_type),
                    if column.nullable { "NULL" } else { "NOT NULL" }
                )));
                if let Some(default) = &column.default {
                    out.push(self.add_default(table, &column.name, default));
                }
            }
            MigrationOperation::RenameColumn {
                table,
                name,
                new_name,
            } => {
                out.push(SqlStatement::new(format!(
                    "EXEC sp_rename {}, {}, N'COLUMN';",
                    self.string_literal(&format!(
                        "{}.{}",
                        self.quote_table(table),
                        self.quote_identifier(name)
                    )),
                    self.string_literal(new_name)
                )));
                let existing = model.require_table(table)?.find_column(name);
                if existing.is_some_and(|c| c.default.is_some()) {
                    out.push(SqlStatement::new(format!(
                        "EXEC sp_rename {}, {}, N'OBJECT';",
                        self.string_literal(
                            &self.qualified_object(table, &default_constraint_name(table, name))
                        ),
                        self.string_literal(&default_constraint_name(table, new_name))
                    )));
                }
            }
            MigrationOperation::AddDefaultConstraint {
                table,
                column,
                default,
            } => out.push(self.add_default(table, column, default)),
            MigrationOperation::DropDefaultConstraint { table, column } => {
                out.push(self.drop_default(table, column));
            }
            MigrationOperation::AddPrimaryKey { table, primary_key } => {
                out.push(SqlStatement::new(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({});",
                    self.quote_table(table),
                    self.quote_identifier(&primary_key.name),
                    self.column_list(&primary_key.columns)
                )));
            }
            MigrationOperation::DropPrimaryKey { table, name }
            | MigrationOperation::DropUniqueConstraint { table, name }
            | MigrationOperation::DropForeignKey { table, name } => {
                out.push(self.drop_constraint(table, name));
            }
            MigrationOperation::AddUniqueConstraint { table, constraint } => {
                out.push(SqlStatement::new(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({});",
                    self.quote_table(table),
                    self.quote_identifier(&constraint.name),
                    self.column_list(&constraint.columns)
                )));
            }
            MigrationOperation::AddForeignKey { table, foreign_key } => {
                out.push(SqlStatement::new(format!(
                    "ALTER TABLE {} ADD {};",
                    self.quote_table(table),
                    self.foreign_key(foreign_key)
                )));
            }
            MigrationOperation::CreateIndex { table, index } => {
                out.push(SqlStatement::new(self.create_index(table, index)));
            }
            MigrationOperation::DropIndex { table, name } => {
                out.push(SqlStatement::new(format!(
                    "DROP INDEX {} ON {};",
                    self.quote_identifier(name),
                    self.quote_table(table)
                )));
            }
            MigrationOperation::RenameIndex {
                table,
                name,
                new_name,
            } => {
                out.push(SqlStatement::new(format!(
                    "EXEC sp_rename {}, {}, N'INDEX';",
                    self.string_literal(&format!(
                        "{}.{}",
                        self.quote_table(table),
                        self.quote_identifier(name)
                    )),
                    self.string_literal(new_name)
                )));
            }
            MigrationOperation::CreateSequence { sequence } => {
                if let Some(schema) = &sequence.name.schema {
                    out.push(self.ensure_schema(schema));
                }
                out.push(SqlStatement::new(self.create_sequence(sequence)));
            }
            MigrationOperation::DropSequence { name } => {
                out.push(SqlStatement::new(format!(
                    "DROP SEQUENCE {};",
                    self.quote_table(name)
                )));
            }
            MigrationOperation::CreateDatabase { name } => {
                out.push(SqlStatement::without_transaction(format!(
                    "CREATE DATABASE {};",
                    self.quote_identifier(name)
                )));
            }
            MigrationOperation::DropDatabase { name } => {
                let db = self.quote_identifier(name);
                out.push(SqlStatement::without_transaction(format!(
                    "IF SERVERPROPERTY('EngineEdition') <> 5\nBEGIN\n    ALTER DATABASE {} SET SINGLE_USER WITH ROLLBACK IMMEDIATE;\nEND;",
                    db
                )));
                out.push(SqlStatement::without_transaction(format!("DROP DATABASE {};", db)));
            }
            MigrationOperation::Sql {
                sql,
                suppress_transaction,
            } => out.push(SqlStatement {
                sql: sql.clone(),
                suppress_transaction: *suppress_transaction,
            }),
        }
        Ok(())
    }

    /// Generate CREATE TABLE statement.
    fn create_table(&self, table: &Table) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(&table.name, c))
            .collect();

        if let Some(pk) = &table.primary_key {
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.quote_identifier(&pk.name),
                self.column_list(&pk.columns)
            ));
        }
        for uc in &table.unique_constraints {
            parts.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                self.quote_identifier(&uc.name),
                self.column_list(&uc.columns)
            ));
        }
        for fk in &table.foreign_keys {
            parts.push(self.foreign_key(fk));
        }

        format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.quote_table(&table.name),
            parts.join(",\n    ")
        )
    }

    /// Column definition with its named default constraint.
    fn column_definition(&self, table: &ObjectName, column: &Column) -> String {
        let mut def = format!(
            "{} {} {}",
            self.quote_identifier(&column.name),
            self.column_type(&column.column_type),
            if column.nullable { "NULL" } else { "NOT NULL" }
        );
        if let Some(default) = &column.default {
            def.push_str(&format!(
                " CONSTRAINT {} DEFAULT ({})",
                self.quote_identifier(&default_constraint_name(table, &column.name)),
                default
            ));
        }
        def
    }

    fn column_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Int16 => "smallint".to_string(),
            ColumnType::Int32 => "int".to_string(),
            ColumnType::Int64 => "bigint".to_string(),
            ColumnType::Boolean => "bit".to_string(),
            ColumnType::Decimal { precision, scale } => format!("decimal({}, {})", precision, scale),
            ColumnType::Float64 => "float".to_string(),
            ColumnType::String { max_length: Some(n) } => format!("nvarchar({})", n),
            ColumnType::String { max_length: None } => "nvarchar(max)".to_string(),
            ColumnType::Binary { max_length: Some(n) } => format!("varbinary({})", n),
            ColumnType::Binary { max_length: None } => "varbinary(max)".to_string(),
            ColumnType::DateTime => "datetime2".to_string(),
            ColumnType::Date => "date".to_string(),
            ColumnType::Time => "time".to_string(),
            ColumnType::Guid => "uniqueidentifier".to_string(),
            ColumnType::Custom { name } => name.clone(),
        }
    }

    fn foreign_key(&self, fk: &ForeignKey) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}){}",
            self.quote_identifier(&fk.name),
            self.column_list(&fk.columns),
            self.quote_table(&fk.referenced_table),
            self.column_list(&fk.referenced_columns),
            if fk.cascade_delete { " ON DELETE CASCADE" } else { "" }
        )
    }

    fn create_index(&self, table: &ObjectName, index: &Index) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({});",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_table(table),
            self.column_list(&index.columns)
        )
    }

    fn create_sequence(&self, sequence: &Sequence) -> String {
        format!(
            "CREATE SEQUENCE {} AS bigint START WITH {} INCREMENT BY {};",
            self.quote_table(&sequence.name),
            sequence.start,
            sequence.increment
        )
    }

    fn ensure_schema(&self, schema: &str) -> SqlStatement {
        SqlStatement::new(format!(
            "IF SCHEMA_ID({}) IS NULL EXEC({});",
            self.string_literal(schema),
            self.string_literal(&format!("CREATE SCHEMA {};", self.quote_identifier(schema)))
        ))
    }

    fn add_default(&self, table: &ObjectName, column: &str, default: &str) -> SqlStatement {
        SqlStatement::new(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT ({}) FOR {};",
            self.quote_table(table),
            self.quote_identifier(&default_constraint_name(table, column)),
            default,
            self.quote_identifier(column)
        ))
    }

    fn drop_default(&self, table: &ObjectName, column: &str) -> SqlStatement {
        self.drop_constraint(table, &default_constraint_name(table, column))
    }

    fn drop_constraint(&self, table: &ObjectName, name: &str) -> SqlStatement {
        SqlStatement::new(format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            self.quote_table(table),
            self.quote_identifier(name)
        ))
    }

    /// Schema-qualified object name for `sp_rename`.
    fn qualified_object(&self, table: &ObjectName, object: &str) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(object)
            ),
            None => self.quote_identifier(object),
        }
    }
}

/// Name of the default constraint backing a column default.
pub(crate) fn default_constraint_name(table: &ObjectName, column: &str) -> String {
    format!("DF_{}_{}", table.name, column)
}
