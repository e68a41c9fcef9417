//! SQLite migration SQL.
//!
//! SQLite's ALTER TABLE only renames tables and columns and appends columns.
//! Every other table change is rendered as a rebuild: the table is renamed
//! aside, recreated in its new shape, refilled and the old copy dropped.
//! Pending changes to the same table are fused into the rebuild (or into the
//! CREATE TABLE that introduces the table) so each table is rebuilt once.

use tracing::{debug, warn};

use super::{MigrationsSqlGenerator, SqlStatement, escape};
use crate::error::{MigrateResult, MigrationError};
use crate::model::{Column, ColumnType, ForeignKey, Index, ObjectName, SchemaModel, Table};
use crate::operation::MigrationOperation;

/// Prefix of the table holding the old rows during a rebuild.
pub const REBUILD_PREFIX: &str = "__rebuild_";

/// Keeps child foreign keys pointing at the original name while a table is
/// renamed aside. Valid inside a transaction.
const LEGACY_RENAMES: &str = "PRAGMA legacy_alter_table = ON;";

/// SQL generator for SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteGenerator;

impl MigrationsSqlGenerator for SqliteGenerator {
    fn name(&self) -> &'static str {
        "Sqlite"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", escape(name, '"'))
    }

    fn quote_table(&self, name: &ObjectName) -> String {
        self.quote_identifier(&name.name)
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", escape(value, '\''))
    }

    fn generate(
        &self,
        operations: &[MigrationOperation],
        source: &SchemaModel,
    ) -> MigrateResult<Vec<SqlStatement>> {
        if operations
            .iter()
            .any(|op| op.table().is_some_and(|t| t.schema.is_some()))
        {
            warn!("SQLite has no schemas; schema qualifiers are ignored");
        }

        let mut model = source.clone();
        let mut statements = Vec::new();
        let mut fused = vec![false; operations.len()];

        for (i, operation) in operations.iter().enumerate() {
            if fused[i] {
                continue;
            }
            match operation {
                MigrationOperation::CreateTable { table } => {
                    let next = self.fuse(operations, i, &model, &mut fused)?;
                    let created = next.require_table(&table.name)?;
                    statements.push(SqlStatement::new(self.create_table(created)));
                    statements.extend(self.create_indexes(created));
                    model = next;
                }
                op if needs_rebuild(op, &model) => {
                    let Some(name) = op.table().cloned() else {
                        continue;
                    };
                    let next = self.fuse(operations, i, &model, &mut fused)?;
                    let old = model.require_table(&name)?;
                    let new = next.require_table(&name)?;
                    statements.extend(self.rebuild(old, new));
                    model = next;
                }
                op => {
                    self.render(op, &model, &mut statements)?;
                    op.apply_to(&mut model)?;
                }
            }
        }

        debug!(
            operations = operations.len(),
            statements = statements.len(),
            "Generated Sqlite migration SQL"
        );
        Ok(statements)
    }
}

/// Kinds that may be folded into a pending CREATE TABLE or rebuild.
fn is_fusable(operation: &MigrationOperation) -> bool {
    matches!(
        operation,
        MigrationOperation::AddColumn { .. }
            | MigrationOperation::DropColumn { .. }
            | MigrationOperation::AlterColumn { .. }
            | MigrationOperation::AddDefaultConstraint { .. }
            | MigrationOperation::DropDefaultConstraint { .. }
            | MigrationOperation::AddPrimaryKey { .. }
            | MigrationOperation::DropPrimaryKey { .. }
            | MigrationOperation::AddUniqueConstraint { .. }
            | MigrationOperation::DropUniqueConstraint { .. }
            | MigrationOperation::AddForeignKey { .. }
            | MigrationOperation::DropForeignKey { .. }
            | MigrationOperation::CreateIndex { .. }
            | MigrationOperation::DropIndex { .. }
    )
}

/// Whether SQLite has no direct ALTER form for this operation.
fn needs_rebuild(operation: &MigrationOperation, model: &SchemaModel) -> bool {
    match operation {
        MigrationOperation::AddColumn { table, column } => {
            // A NOT NULL column needs a default to be appended, and a column
            // covered by the table's keys cannot be appended at all.
            let keyed = model.table(table).is_some_and(|t| {
                t.primary_key
                    .as_ref()
                    .is_some_and(|pk| pk.columns.contains(&column.name))
            });
            let default_is_constant = column.default.as_deref().is_none_or(is_constant_default);
            (!column.nullable && column.default.is_none()) || !default_is_constant || keyed
        }
        MigrationOperation::DropColumn { .. }
        | MigrationOperation::AlterColumn { .. }
        | MigrationOperation::AddDefaultConstraint { .. }
        | MigrationOperation::DropDefaultConstraint { .. }
        | MigrationOperation::AddPrimaryKey { .. }
        | MigrationOperation::DropPrimaryKey { .. }
        | MigrationOperation::AddUniqueConstraint { .. }
        | MigrationOperation::DropUniqueConstraint { .. }
        | MigrationOperation::AddForeignKey { .. }
        | MigrationOperation::DropForeignKey { .. } => true,
        _ => false,
    }
}

/// Whether `ALTER TABLE .. ADD COLUMN` accepts this default.
///
/// SQLite only appends columns whose default is a literal: a number, a
/// string or blob, `NULL`, `TRUE` or `FALSE`, optionally signed or
/// parenthesized. `CURRENT_TIMESTAMP` and function calls are rejected.
fn is_constant_default(expr: &str) -> bool {
    let mut expr = expr.trim();
    while let Some(inner) = expr.strip_prefix('(').and_then(|e| e.strip_suffix(')')) {
        expr = inner.trim();
    }

    if ["NULL", "TRUE", "FALSE"]
        .iter()
        .any(|keyword| expr.eq_ignore_ascii_case(keyword))
    {
        return true;
    }

    let unsigned = expr
        .strip_prefix(['-', '+'])
        .map_or(expr, str::trim_start);
    if unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return unsigned.parse::<f64>().is_ok()
            || unsigned
                .strip_prefix("0x")
                .or_else(|| unsigned.strip_prefix("0X"))
                .is_some_and(|hex| i64::from_str_radix(hex, 16).is_ok());
    }

    let quoted = expr
        .strip_prefix(['x', 'X'])
        .filter(|rest| rest.starts_with('\''))
        .unwrap_or(expr);
    quoted.len() >= 2
        && quoted.starts_with('\'')
        && quoted.ends_with('\'')
        && !quoted[1..quoted.len() - 1].replace("''", "").contains('\'')
}

impl SqliteGenerator {
    /// Apply `operations[start]` and every later fusable operation on the same
    /// table, stopping at raw SQL or at the first other change to that table.
    fn fuse(
        &self,
        operations: &[MigrationOperation],
        start: usize,
        model: &SchemaModel,
        fused: &mut [bool],
    ) -> MigrateResult<SchemaModel> {
        let first = &operations[start];
        let mut next = model.apply(std::slice::from_ref(first))?;
        fused[start] = true;

        let Some(table) = first.table() else {
            return Ok(next);
        };

        for (j, operation) in operations.iter().enumerate().skip(start + 1) {
            if fused[j] {
                continue;
            }
            if matches!(operation, MigrationOperation::Sql { .. }) {
                break;
            }
            if operation.table() != Some(table) {
                continue;
            }
            if !is_fusable(operation) {
                break;
            }
            match next.apply(std::slice::from_ref(operation)) {
                Ok(applied) => {
                    debug!(table = %table, operation = operation.kind(), "Fused operation into table definition");
                    next = applied;
                    fused[j] = true;
                }
                Err(_) => break,
            }
        }
        Ok(next)
    }

    /// Render an operation SQLite supports directly.
    fn render(
        &self,
        operation: &MigrationOperation,
        model: &SchemaModel,
        out: &mut Vec<SqlStatement>,
    ) -> MigrateResult<()> {
        match operation {
            MigrationOperation::DropTable { name } => {
                out.push(SqlStatement::new(format!("DROP TABLE {};", self.quote_table(name))));
            }
            MigrationOperation::RenameTable { name, new_name } => {
                // Rebuilds run with legacy renames so child keys keep their
                // target; a real rename must carry child keys along.
                let referenced = model
                    .references_to(name)
                    .any(|(dependent, _)| &dependent.name != name);
                let rename = SqlStatement::new(format!(
                    "ALTER TABLE {} RENAME TO {};",
                    self.quote_table(name),
                    self.quote_identifier(new_name)
                ));
                if referenced {
                    out.push(SqlStatement::new("PRAGMA legacy_alter_table = OFF;"));
                    out.push(rename);
                    out.push(SqlStatement::new(LEGACY_RENAMES));
                } else {
                    out.push(rename);
                }
            }
            MigrationOperation::AddColumn { table, column } => {
                out.push(SqlStatement::new(format!(
                    "ALTER TABLE {} ADD COLUMN {};",
                    self.quote_table(table),
                    self.column_definition(column)
                )));
            }
            MigrationOperation::RenameColumn {
                table,
                name,
                new_name,
            } => {
                out.push(SqlStatement::new(format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {};",
                    self.quote_table(table),
                    self.quote_identifier(name),
                    self.quote_identifier(new_name)
                )));
            }
            MigrationOperation::CreateIndex { table, index } => {
                out.push(SqlStatement::new(self.create_index(table, index)));
            }
            MigrationOperation::DropIndex { name, .. } => {
                out.push(SqlStatement::new(format!(
                    "DROP INDEX {};",
                    self.quote_identifier(name)
                )));
            }
            MigrationOperation::RenameIndex {
                table,
                name,
                new_name,
            } => {
                let index = model
                    .require_table(table)?
                    .find_index(name)
                    .ok_or_else(|| {
                        MigrationError::invalid_schema(format!(
                            "index '{}' does not exist on table '{}'",
                            name, table
                        ))
                    })?;
                let renamed = Index {
                    name: new_name.clone(),
                    ..index.clone()
                };
                out.push(SqlStatement::new(format!(
                    "DROP INDEX {};",
                    self.quote_identifier(name)
                )));
                out.push(SqlStatement::new(self.create_index(table, &renamed)));
            }
            MigrationOperation::Sql {
                sql,
                suppress_transaction,
            } => out.push(SqlStatement {
                sql: sql.clone(),
                suppress_transaction: *suppress_transaction,
            }),
            other => return Err(MigrationError::unsupported(self.name(), other.kind())),
        }
        Ok(())
    }

    /// The four-statement rebuild plus recreation of the table's indexes.
    ///
    /// The rebuild sets legacy rename semantics itself so a script replayed on
    /// a plain connection keeps child foreign keys on the original name.
    fn rebuild(&self, old: &Table, new: &Table) -> Vec<SqlStatement> {
        let temp = format!("{}{}", REBUILD_PREFIX, new.name.name);
        debug!(table = %new.name, "Rebuilding table");

        let copied: Vec<String> = new
            .columns
            .iter()
            .filter(|c| old.has_column(&c.name))
            .map(|c| c.name.clone())
            .collect();
        let columns = self.column_list(&copied);

        let mut statements = vec![
            SqlStatement::new(LEGACY_RENAMES),
            SqlStatement::new(format!(
                "ALTER TABLE {} RENAME TO {};",
                self.quote_table(&old.name),
                self.quote_identifier(&temp)
            )),
            SqlStatement::new(self.create_table(new)),
            SqlStatement::new(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {};",
                self.quote_table(&new.name),
                columns,
                columns,
                self.quote_identifier(&temp)
            )),
            SqlStatement::new(format!("DROP TABLE {};", self.quote_identifier(&temp))),
        ];
        statements.extend(self.create_indexes(new));
        statements
    }

    /// Generate CREATE TABLE statement.
    fn create_table(&self, table: &Table) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
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

    fn create_indexes(&self, table: &Table) -> Vec<SqlStatement> {
        table
            .indexes
            .iter()
            .map(|index| SqlStatement::new(self.create_index(&table.name, index)))
            .collect()
    }

    fn column_definition(&self, column: &Column) -> String {
        let mut def = format!(
            "{} {} {}",
            self.quote_identifier(&column.name),
            self.column_type(&column.column_type),
            if column.nullable { "NULL" } else { "NOT NULL" }
        );
        if let Some(default) = &column.default {
            def.push_str(&format!(" DEFAULT ({})", default));
        }
        def
    }

    fn column_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Int16 | ColumnType::Int32 | ColumnType::Int64 | ColumnType::Boolean => {
                "INTEGER".to_string()
            }
            ColumnType::Float64 => "REAL".to_string(),
            ColumnType::Binary { .. } => "BLOB".to_string(),
            ColumnType::Decimal { .. }
            | ColumnType::String { .. }
            | ColumnType::DateTime
            | ColumnType::Date
            | ColumnType::Time
            | ColumnType::Guid => "TEXT".to_string(),
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
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{PrimaryKey, Sequence};

    fn sql(ops: &[MigrationOperation], source: &SchemaModel) -> Vec<String> {
        SqliteGenerator
            .generate(ops, source)
            .unwrap()
            .into_iter()
            .map(|s| s.sql)
            .collect()
    }

    fn blogs() -> Table {
        Table::new("Blogs")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("Url", ColumnType::text()).nullable())
            .primary_key("PK_Blogs", ["Id"])
    }

    fn posts() -> Table {
        Table::new("Posts")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("BlogId", ColumnType::Int32))
            .column(Column::new("Rating", ColumnType::Int32))
            .primary_key("PK_Posts", ["Id"])
            .foreign_key(ForeignKey::new("FK_Posts_Blogs_BlogId", ["BlogId"], "Blogs", ["Id"]))
    }

    fn model(tables: Vec<Table>) -> SchemaModel {
        tables
            .into_iter()
            .fold(SchemaModel::builder(), |b, t| b.table(t))
            .build()
            .unwrap()
    }

    #[test]
    fn test_alter_column_type_rebuilds_table() {
        let source = model(vec![blogs(), posts()]);
        let ops = [MigrationOperation::AlterColumn {
            table: "Posts".into(),
            column: Column::new("Rating", ColumnType::Float64),
            old_column: Column::new("Rating", ColumnType::Int32),
        }];

        assert_eq!(
            sql(&ops, &source),
            vec![
                "PRAGMA legacy_alter_table = ON;",
                "ALTER TABLE \"Posts\" RENAME TO \"__rebuild_Posts\";",
                "CREATE TABLE \"Posts\" (\n    \"Id\" INTEGER NOT NULL,\n    \"BlogId\" INTEGER NOT NULL,\n    \"Rating\" REAL NOT NULL,\n    CONSTRAINT \"PK_Posts\" PRIMARY KEY (\"Id\"),\n    CONSTRAINT \"FK_Posts_Blogs_BlogId\" FOREIGN KEY (\"BlogId\") REFERENCES \"Blogs\" (\"Id\")\n);",
                "INSERT INTO \"Posts\" (\"Id\", \"BlogId\", \"Rating\") SELECT \"Id\", \"BlogId\", \"Rating\" FROM \"__rebuild_Posts\";",
                "DROP TABLE \"__rebuild_Posts\";",
            ]
        );
    }

    #[test]
    fn test_create_table_fuses_later_operations() {
        let nodes = Table::new("Nodes")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("ParentId", ColumnType::Int32).nullable())
            .primary_key("PK_Nodes", ["Id"]);
        let ops = [
            MigrationOperation::CreateTable { table: nodes },
            MigrationOperation::CreateTable { table: blogs() },
            MigrationOperation::AddForeignKey {
                table: "Nodes".into(),
                foreign_key: ForeignKey::new("FK_Nodes_Parent", ["ParentId"], "Nodes", ["Id"]),
            },
            MigrationOperation::CreateIndex {
                table: "Nodes".into(),
                index: Index::new("IX_Nodes_ParentId", ["ParentId"]),
            },
            MigrationOperation::CreateIndex {
                table: "Blogs".into(),
                index: Index::new("IX_Blogs_Url", ["Url"]),
            },
        ];

        let statements = sql(&ops, &SchemaModel::empty());
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE TABLE \"Nodes\""));
        assert!(statements[0].contains("CONSTRAINT \"FK_Nodes_Parent\" FOREIGN KEY (\"ParentId\") REFERENCES \"Nodes\" (\"Id\")"));
        assert_eq!(statements[1], "CREATE INDEX \"IX_Nodes_ParentId\" ON \"Nodes\" (\"ParentId\");");
        assert!(statements[2].starts_with("CREATE TABLE \"Blogs\""));
        assert_eq!(statements[3], "CREATE INDEX \"IX_Blogs_Url\" ON \"Blogs\" (\"Url\");");
    }

    #[test]
    fn test_consecutive_changes_share_one_rebuild() {
        let source = model(vec![blogs(), posts()]);
        let ops = [
            MigrationOperation::DropForeignKey {
                table: "Posts".into(),
                name: "FK_Posts_Blogs_BlogId".into(),
            },
            MigrationOperation::DropColumn {
                table: "Posts".into(),
                column: "BlogId".into(),
            },
            MigrationOperation::AddColumn {
                table: "Blogs".into(),
                column: Column::new("Title", ColumnType::text()).nullable(),
            },
            MigrationOperation::AddDefaultConstraint {
                table: "Posts".into(),
                column: "Rating".into(),
                default: "0".into(),
            },
        ];

        let statements = sql(&ops, &source);
        assert_eq!(statements.len(), 6);
        assert_eq!(statements[0], "PRAGMA legacy_alter_table = ON;");
        assert_eq!(statements[1], "ALTER TABLE \"Posts\" RENAME TO \"__rebuild_Posts\";");
        assert_eq!(
            statements[2],
            "CREATE TABLE \"Posts\" (\n    \"Id\" INTEGER NOT NULL,\n    \"Rating\" INTEGER NOT NULL DEFAULT (0),\n    CONSTRAINT \"PK_Posts\" PRIMARY KEY (\"Id\")\n);"
        );
        assert_eq!(
            statements[3],
            "INSERT INTO \"Posts\" (\"Id\", \"Rating\") SELECT \"Id\", \"Rating\" FROM \"__rebuild_Posts\";"
        );
        assert_eq!(statements[4], "DROP TABLE \"__rebuild_Posts\";");
        assert_eq!(statements[5], "ALTER TABLE \"Blogs\" ADD COLUMN \"Title\" TEXT NULL;");
    }

    #[test]
    fn test_fusion_stops_at_raw_sql_and_renames() {
        let source = model(vec![blogs(), posts()]);
        let ops = [
            MigrationOperation::DropDefaultConstraint {
                table: "Blogs".into(),
                column: "Url".into(),
            },
            MigrationOperation::RenameColumn {
                table: "Blogs".into(),
                name: "Url".into(),
                new_name: "Address".into(),
            },
            MigrationOperation::AddDefaultConstraint {
                table: "Blogs".into(),
                column: "Address".into(),
                default: "''".into(),
            },
            MigrationOperation::sql("UPDATE \"Blogs\" SET \"Address\" = ''"),
            MigrationOperation::AddUniqueConstraint {
                table: "Blogs".into(),
                constraint: crate::model::UniqueConstraint::new("AK_Blogs_Address", ["Address"]),
            },
        ];

        let statements = sql(&ops, &source);
        // rebuild, rename, rebuild, raw sql, rebuild
        assert_eq!(statements.len(), 5 + 1 + 5 + 1 + 5);
        assert_eq!(statements[5], "ALTER TABLE \"Blogs\" RENAME COLUMN \"Url\" TO \"Address\";");
        assert_eq!(statements[11], "UPDATE \"Blogs\" SET \"Address\" = ''");
        assert!(statements[14].contains("CONSTRAINT \"AK_Blogs_Address\" UNIQUE (\"Address\")"));
    }

    #[test]
    fn test_rebuild_recreates_indexes() {
        let source = model(vec![blogs().index(Index::new("IX_Blogs_Url", ["Url"]))]);
        let ops = [MigrationOperation::DropPrimaryKey {
            table: "Blogs".into(),
            name: "PK_Blogs".into(),
        }];
        let statements = sql(&ops, &source);
        assert_eq!(statements.len(), 6);
        assert_eq!(statements[5], "CREATE INDEX \"IX_Blogs_Url\" ON \"Blogs\" (\"Url\");");
        assert!(!statements[2].contains("PRIMARY KEY"));
    }

    #[test]
    fn test_add_not_null_column_without_default_rebuilds() {
        let source = model(vec![blogs()]);
        let add = |column: Column| MigrationOperation::AddColumn {
            table: "Blogs".into(),
            column,
        };

        let native = sql(&[add(Column::new("Rating", ColumnType::Int32).default_sql("0"))], &source);
        assert_eq!(
            native,
            vec!["ALTER TABLE \"Blogs\" ADD COLUMN \"Rating\" INTEGER NOT NULL DEFAULT (0);"]
        );

        let rebuilt = sql(&[add(Column::new("Rating", ColumnType::Int32))], &source);
        assert_eq!(rebuilt.len(), 5);
        assert_eq!(
            rebuilt[3],
            "INSERT INTO \"Blogs\" (\"Id\", \"Url\") SELECT \"Id\", \"Url\" FROM \"__rebuild_Blogs\";"
        );
    }

    #[test]
    fn test_add_column_with_computed_default_rebuilds() {
        let source = model(vec![blogs()]);
        let add = |default: &str| MigrationOperation::AddColumn {
            table: "Blogs".into(),
            column: Column::new("CreatedAt", ColumnType::DateTime).default_sql(default),
        };

        for default in ["CURRENT_TIMESTAMP", "datetime('now')", "(random())"] {
            let statements = sql(&[add(default)], &source);
            assert_eq!(statements.len(), 5, "{default}");
            assert_eq!(statements[1], "ALTER TABLE \"Blogs\" RENAME TO \"__rebuild_Blogs\";");
            assert!(statements[2].contains(&format!("\"CreatedAt\" TEXT NOT NULL DEFAULT ({default})")));
        }

        for default in ["'2024-01-01'", "-1.5", "(NULL)", "X'00FF'", "0x10"] {
            let statements = sql(&[add(default)], &source);
            assert_eq!(statements.len(), 1, "{default}");
            assert!(statements[0].starts_with("ALTER TABLE \"Blogs\" ADD COLUMN \"CreatedAt\""));
        }
    }

    #[test]
    fn test_constant_defaults() {
        for expr in ["0", " 42 ", "+7", "- 3", "1e3", ".5", "'a''b'", "x'ab'", "true", "((Null))"] {
            assert!(is_constant_default(expr), "{expr}");
        }
        for expr in ["CURRENT_DATE", "abs(1)", "'a' || 'b'", "1 + 1", "'unterminated", ""] {
            assert!(!is_constant_default(expr), "{expr}");
        }
    }

    #[test]
    fn test_rename_index_is_drop_and_create() {
        let source = model(vec![blogs().index(Index::new("IX_Blogs_Url", ["Url"]).unique())]);
        let statements = sql(
            &[MigrationOperation::RenameIndex {
                table: "Blogs".into(),
                name: "IX_Blogs_Url".into(),
                new_name: "IX_Blogs_Address".into(),
            }],
            &source,
        );
        assert_eq!(
            statements,
            vec![
                "DROP INDEX \"IX_Blogs_Url\";",
                "CREATE UNIQUE INDEX \"IX_Blogs_Address\" ON \"Blogs\" (\"Url\");",
            ]
        );
    }

    #[test]
    fn test_rename_referenced_table_carries_children() {
        let source = model(vec![blogs(), posts()]);
        let ops = [MigrationOperation::RenameTable {
            name: "Blogs".into(),
            new_name: "Weblogs".into(),
        }];
        assert_eq!(
            sql(&ops, &source),
            vec![
                "PRAGMA legacy_alter_table = OFF;",
                "ALTER TABLE \"Blogs\" RENAME TO \"Weblogs\";",
                "PRAGMA legacy_alter_table = ON;",
            ]
        );

        let lone = model(vec![blogs()]);
        assert_eq!(sql(&ops, &lone), vec!["ALTER TABLE \"Blogs\" RENAME TO \"Weblogs\";"]);
    }

    #[test]
    fn test_unsupported_operations() {
        let cases = [
            MigrationOperation::CreateSequence {
                sequence: Sequence::new("S"),
            },
            MigrationOperation::CreateDatabase { name: "db".into() },
            MigrationOperation::MoveTableToSchema {
                name: "Blogs".into(),
                new_schema: Some("archive".into()),
            },
        ];
        for op in cases {
            let err = SqliteGenerator
                .generate(std::slice::from_ref(&op), &model(vec![blogs()]))
                .unwrap_err();
            match err {
                MigrationError::DialectUnsupportedOperation { dialect, operation } => {
                    assert_eq!(dialect, "Sqlite");
                    assert_eq!(operation, op.kind());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_add_primary_key_in_rebuild() {
        let source = model(vec![Table::new("T").column(Column::new("A", ColumnType::Int32))]);
        let statements = sql(
            &[MigrationOperation::AddPrimaryKey {
                table: "T".into(),
                primary_key: PrimaryKey::new("PK_T", ["A"]),
            }],
            &source,
        );
        assert_eq!(statements.len(), 5);
        assert!(statements[2].contains("CONSTRAINT \"PK_T\" PRIMARY KEY (\"A\")"));
    }
}
