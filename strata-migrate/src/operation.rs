//! Abstract schema-change operations.

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::model::{
    Column, ForeignKey, Index, ObjectName, PrimaryKey, SchemaModel, Sequence, Table,
    UniqueConstraint,
};

/// A single schema change.
///
/// Operations are plain values; they are produced by the differ or written by
/// hand, and rendered to SQL by a dialect generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationOperation {
    /// Create a table with its columns, keys and constraints.
    CreateTable {
        /// Full table definition.
        table: Table,
    },
    /// Drop a table.
    DropTable {
        /// Table to drop.
        name: ObjectName,
    },
    /// Rename a table within its schema.
    RenameTable {
        /// Current name.
        name: ObjectName,
        /// New unqualified name.
        new_name: String,
    },
    /// Move a table to another schema.
    MoveTableToSchema {
        /// Current name.
        name: ObjectName,
        /// Destination schema, `None` for the default schema.
        new_schema: Option<String>,
    },
    /// Add a column.
    AddColumn {
        /// Owning table.
        table: ObjectName,
        /// New column.
        column: Column,
    },
    /// Drop a column.
    DropColumn {
        /// Owning table.
        table: ObjectName,
        /// Column name.
        column: String,
    },
    /// Change a column's type, nullability or default.
    AlterColumn {
        /// Owning table.
        table: ObjectName,
        /// New definition.
        column: Column,
        /// Definition being replaced.
        old_column: Column,
    },
    /// Rename a column.
    RenameColumn {
        /// Owning table.
        table: ObjectName,
        /// Current name.
        name: String,
        /// New name.
        new_name: String,
    },
    /// Set a column default.
    AddDefaultConstraint {
        /// Owning table.
        table: ObjectName,
        /// Column name.
        column: String,
        /// Default SQL expression.
        default: String,
    },
    /// Remove a column default.
    DropDefaultConstraint {
        /// Owning table.
        table: ObjectName,
        /// Column name.
        column: String,
    },
    /// Add a primary key.
    AddPrimaryKey {
        /// Owning table.
        table: ObjectName,
        /// Key definition.
        primary_key: PrimaryKey,
    },
    /// Drop the primary key.
    DropPrimaryKey {
        /// Owning table.
        table: ObjectName,
        /// Key name.
        name: String,
    },
    /// Add a unique constraint.
    AddUniqueConstraint {
        /// Owning table.
        table: ObjectName,
        /// Constraint definition.
        constraint: UniqueConstraint,
    },
    /// Drop a unique constraint.
    DropUniqueConstraint {
        /// Owning table.
        table: ObjectName,
        /// Constraint name.
        name: String,
    },
    /// Add a foreign key.
    AddForeignKey {
        /// Dependent table.
        table: ObjectName,
        /// Key definition.
        foreign_key: ForeignKey,
    },
    /// Drop a foreign key.
    DropForeignKey {
        /// Dependent table.
        table: ObjectName,
        /// Key name.
        name: String,
    },
    /// Create an index.
    CreateIndex {
        /// Owning table.
        table: ObjectName,
        /// Index definition.
        index: Index,
    },
    /// Drop an index.
    DropIndex {
        /// Owning table.
        table: ObjectName,
        /// Index name.
        name: String,
    },
    /// Rename an index.
    RenameIndex {
        /// Owning table.
        table: ObjectName,
        /// Current name.
        name: String,
        /// New name.
        new_name: String,
    },
    /// Create a sequence.
    CreateSequence {
        /// Sequence definition.
        sequence: Sequence,
    },
    /// Drop a sequence.
    DropSequence {
        /// Sequence name.
        name: ObjectName,
    },
    /// Create a database.
    CreateDatabase {
        /// Database name.
        name: String,
    },
    /// Drop a database.
    DropDatabase {
        /// Database name.
        name: String,
    },
    /// Raw SQL written by hand.
    Sql {
        /// Statement text.
        sql: String,
        /// The statement must run outside a transaction.
        #[serde(default)]
        suppress_transaction: bool,
    },
}

impl MigrationOperation {
    /// Raw SQL that runs inside the step's transaction.
    pub fn sql(sql: impl Into<String>) -> Self {
        Self::Sql {
            sql: sql.into(),
            suppress_transaction: false,
        }
    }

    /// Raw SQL that must run outside a transaction.
    pub fn sql_without_transaction(sql: impl Into<String>) -> Self {
        Self::Sql {
            sql: sql.into(),
            suppress_transaction: true,
        }
    }

    /// Operation kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "CreateTable",
            Self::DropTable { .. } => "DropTable",
            Self::RenameTable { .. } => "RenameTable",
            Self::MoveTableToSchema { .. } => "MoveTableToSchema",
            Self::AddColumn { .. } => "AddColumn",
            Self::DropColumn { .. } => "DropColumn",
            Self::AlterColumn { .. } => "AlterColumn",
            Self::RenameColumn { .. } => "RenameColumn",
            Self::AddDefaultConstraint { .. } => "AddDefaultConstraint",
            Self::DropDefaultConstraint { .. } => "DropDefaultConstraint",
            Self::AddPrimaryKey { .. } => "AddPrimaryKey",
            Self::DropPrimaryKey { .. } => "DropPrimaryKey",
            Self::AddUniqueConstraint { .. } => "AddUniqueConstraint",
            Self::DropUniqueConstraint { .. } => "DropUniqueConstraint",
            Self::AddForeignKey { .. } => "AddForeignKey",
            Self::DropForeignKey { .. } => "DropForeignKey",
            Self::CreateIndex { .. } => "CreateIndex",
            Self::DropIndex { .. } => "DropIndex",
            Self::RenameIndex { .. } => "RenameIndex",
            Self::CreateSequence { .. } => "CreateSequence",
            Self::DropSequence { .. } => "DropSequence",
            Self::CreateDatabase { .. } => "CreateDatabase",
            Self::DropDatabase { .. } => "DropDatabase",
            Self::Sql { .. } => "Sql",
        }
    }

    /// The table this operation acts on, if any.
    pub fn table(&self) -> Option<&ObjectName> {
        match self {
            Self::CreateTable { table } => Some(&table.name),
            Self::DropTable { name }
            | Self::RenameTable { name, .. }
            | Self::MoveTableToSchema { name, .. } => Some(name),
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AddDefaultConstraint { table, .. }
            | Self::DropDefaultConstraint { table, .. }
            | Self::AddPrimaryKey { table, .. }
            | Self::DropPrimaryKey { table, .. }
            | Self::AddUniqueConstraint { table, .. }
            | Self::DropUniqueConstraint { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::RenameIndex { table, .. } => Some(table),
            Self::CreateSequence { .. }
            | Self::DropSequence { .. }
            | Self::CreateDatabase { .. }
            | Self::DropDatabase { .. }
            | Self::Sql { .. } => None,
        }
    }

    /// Whether applying this operation can discard stored data.
    pub fn is_destructive(&self) -> bool {
        match self {
            Self::DropTable { .. }
            | Self::DropColumn { .. }
            | Self::DropSequence { .. }
            | Self::DropDatabase { .. } => true,
            Self::AlterColumn {
                column, old_column, ..
            } => column.column_type != old_column.column_type,
            _ => false,
        }
    }

    /// Apply this operation to a model being built up.
    pub(crate) fn apply_to(&self, model: &mut SchemaModel) -> MigrateResult<()> {
        match self {
            Self::CreateTable { table } => {
                if model.contains_table(&table.name) {
                    return Err(MigrationError::invalid_schema(format!(
                        "table '{}' already exists",
                        table.name
                    )));
                }
                table.validate()?;
                let mut table = table.clone();
                table.normalize();
                model.tables_mut().insert(table.name.clone(), table);
            }
            Self::DropTable { name } => {
                model.require_table(name)?;
                if let Some((dependent, fk)) = model
                    .references_to(name)
                    .find(|(dependent, _)| &dependent.name != name)
                {
                    return Err(MigrationError::invalid_schema(format!(
                        "table '{}' is still referenced by foreign key '{}' on '{}'",
                        name, fk.name, dependent.name
                    )));
                }
                model.tables_mut().remove(name);
            }
            Self::RenameTable { name, new_name } => {
                relocate_table(model, name, name.with_name(new_name.clone()))?;
            }
            Self::MoveTableToSchema { name, new_schema } => {
                relocate_table(model, name, name.with_schema(new_schema.clone()))?;
            }
            Self::AddColumn { table, column } => {
                let target = model.table_mut(table)?;
                if target.has_column(&column.name) {
                    return Err(MigrationError::invalid_schema(format!(
                        "column '{}' already exists in table '{}'",
                        column.name, table
                    )));
                }
                target.columns.push(column.clone());
            }
            Self::DropColumn { table, column } => {
                let external = model
                    .references_to(table)
                    .find(|(dependent, fk)| {
                        &dependent.name != table && fk.referenced_columns.iter().any(|c| c == column)
                    })
                    .map(|(_, fk)| fk.name.clone());
                let target = model.table_mut(table)?;
                let position = column_position(target, column)?;
                if let Some(name) = target.dependents_of_column(column).first().map(|n| n.to_string()).or(external) {
                    return Err(MigrationError::invalid_schema(format!(
                        "column '{}' of table '{}' is still used by '{}'",
                        column, table, name
                    )));
                }
                target.columns.remove(position);
            }
            Self::AlterColumn { table, column, .. } => {
                let target = model.table_mut(table)?;
                let position = column_position(target, &column.name)?;
                target.columns[position] = column.clone();
            }
            Self::RenameColumn {
                table,
                name,
                new_name,
            } => rename_column(model, table, name, new_name)?,
            Self::AddDefaultConstraint {
                table,
                column,
                default,
            } => {
                let target = model.table_mut(table)?;
                let position = column_position(target, column)?;
                target.columns[position].default = Some(default.clone());
            }
            Self::DropDefaultConstraint { table, column } => {
                let target = model.table_mut(table)?;
                let position = column_position(target, column)?;
                target.columns[position].default = None;
            }
            Self::AddPrimaryKey { table, primary_key } => {
                let target = model.table_mut(table)?;
                if let Some(existing) = &target.primary_key {
                    return Err(MigrationError::invalid_schema(format!(
                        "table '{}' already has primary key '{}'",
                        table, existing.name
                    )));
                }
                target.primary_key = Some(primary_key.clone());
                target.validate()?;
            }
            Self::DropPrimaryKey { table, name } => {
                let target = model.table_mut(table)?;
                match &target.primary_key {
                    Some(pk) if &pk.name == name => target.primary_key = None,
                    _ => return Err(missing("primary key", name, table)),
                }
            }
            Self::AddUniqueConstraint { table, constraint } => {
                let target = model.table_mut(table)?;
                target.unique_constraints.push(constraint.clone());
                target.validate()?;
                target.normalize();
            }
            Self::DropUniqueConstraint { table, name } => {
                let target = model.table_mut(table)?;
                let before = target.unique_constraints.len();
                target.unique_constraints.retain(|uc| &uc.name != name);
                if target.unique_constraints.len() == before {
                    return Err(missing("unique constraint", name, table));
                }
            }
            Self::AddForeignKey { table, foreign_key } => {
                let target = model.table_mut(table)?;
                target.foreign_keys.push(foreign_key.clone());
                target.validate()?;
                target.normalize();
            }
            Self::DropForeignKey { table, name } => {
                let target = model.table_mut(table)?;
                let before = target.foreign_keys.len();
                target.foreign_keys.retain(|fk| &fk.name != name);
                if target.foreign_keys.len() == before {
                    return Err(missing("foreign key", name, table));
                }
            }
            Self::CreateIndex { table, index } => {
                let target = model.table_mut(table)?;
                target.indexes.push(index.clone());
                target.validate()?;
                target.normalize();
            }
            Self::DropIndex { table, name } => {
                let target = model.table_mut(table)?;
                let before = target.indexes.len();
                target.indexes.retain(|ix| &ix.name != name);
                if target.indexes.len() == before {
                    return Err(missing("index", name, table));
                }
            }
            Self::RenameIndex {
                table,
                name,
                new_name,
            } => {
                let target = model.table_mut(table)?;
                let index = target
                    .indexes
                    .iter_mut()
                    .find(|ix| &ix.name == name)
                    .ok_or_else(|| missing("index", name, table))?;
                index.name = new_name.clone();
                target.validate()?;
                target.normalize();
            }
            Self::CreateSequence { sequence } => {
                if model.sequence(&sequence.name).is_some() {
                    return Err(MigrationError::invalid_schema(format!(
                        "sequence '{}' already exists",
                        sequence.name
                    )));
                }
                model
                    .sequences_mut()
                    .insert(sequence.name.clone(), sequence.clone());
            }
            Self::DropSequence { name } => {
                if model.sequences_mut().remove(name).is_none() {
                    return Err(MigrationError::invalid_schema(format!(
                        "sequence '{}' does not exist",
                        name
                    )));
                }
            }
            Self::DropDatabase { .. } => *model = SchemaModel::empty(),
            Self::CreateDatabase { .. } | Self::Sql { .. } => {}
        }
        Ok(())
    }
}

fn missing(kind: &str, name: &str, table: &ObjectName) -> MigrationError {
    MigrationError::invalid_schema(format!("{} '{}' does not exist on table '{}'", kind, name, table))
}

fn column_position(table: &Table, column: &str) -> MigrateResult<usize> {
    table
        .columns
        .iter()
        .position(|c| c.name == column)
        .ok_or_else(|| {
            MigrationError::invalid_schema(format!(
                "column '{}' does not exist in table '{}'",
                column, table.name
            ))
        })
}

fn relocate_table(model: &mut SchemaModel, from: &ObjectName, to: ObjectName) -> MigrateResult<()> {
    if model.contains_table(&to) {
        return Err(MigrationError::invalid_schema(format!(
            "table '{}' already exists",
            to
        )));
    }
    let mut table = model
        .tables_mut()
        .remove(from)
        .ok_or_else(|| MigrationError::invalid_schema(format!("table '{}' does not exist", from)))?;
    table.name = to.clone();
    model.tables_mut().insert(to.clone(), table);

    for table in model.tables_mut().values_mut() {
        for fk in &mut table.foreign_keys {
            if &fk.referenced_table == from {
                fk.referenced_table = to.clone();
            }
        }
    }
    Ok(())
}

fn rename_column(
    model: &mut SchemaModel,
    table: &ObjectName,
    name: &str,
    new_name: &str,
) -> MigrateResult<()> {
    let rename = |columns: &mut Vec<String>| {
        for column in columns.iter_mut() {
            if column == name {
                *column = new_name.to_string();
            }
        }
    };

    {
        let target = model.table_mut(table)?;
        let position = column_position(target, name)?;
        if target.has_column(new_name) {
            return Err(MigrationError::invalid_schema(format!(
                "column '{}' already exists in table '{}'",
                new_name, table
            )));
        }
        target.columns[position].name = new_name.to_string();
        if let Some(pk) = &mut target.primary_key {
            rename(&mut pk.columns);
        }
        for fk in &mut target.foreign_keys {
            rename(&mut fk.columns);
        }
        for index in &mut target.indexes {
            rename(&mut index.columns);
        }
        for uc in &mut target.unique_constraints {
            rename(&mut uc.columns);
        }
    }

    for other in model.tables_mut().values_mut() {
        for fk in &mut other.foreign_keys {
            if &fk.referenced_table == table {
                rename(&mut fk.referenced_columns);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnType;

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
            .primary_key("PK_Posts", ["Id"])
            .foreign_key(ForeignKey::new("FK_Posts_Blogs_BlogId", ["BlogId"], "Blogs", ["Id"]))
    }

    #[test]
    fn test_apply_leaves_source_untouched() {
        let empty = SchemaModel::empty();
        let next = empty
            .apply(&[MigrationOperation::CreateTable { table: blogs() }])
            .unwrap();
        assert!(empty.is_empty());
        assert!(next.contains_table(&"Blogs".into()));
    }

    #[test]
    fn test_drop_referenced_table_fails() {
        let model = SchemaModel::builder().table(blogs()).table(posts()).build().unwrap();
        let result = model.apply(&[MigrationOperation::DropTable { name: "Blogs".into() }]);
        assert!(result.is_err());

        let ok = model.apply(&[
            MigrationOperation::DropForeignKey {
                table: "Posts".into(),
                name: "FK_Posts_Blogs_BlogId".into(),
            },
            MigrationOperation::DropTable { name: "Blogs".into() },
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_rename_table_repoints_foreign_keys() {
        let model = SchemaModel::builder().table(blogs()).table(posts()).build().unwrap();
        let next = model
            .apply(&[MigrationOperation::RenameTable {
                name: "Blogs".into(),
                new_name: "Weblogs".into(),
            }])
            .unwrap();
        let posts = next.table(&"Posts".into()).unwrap();
        assert_eq!(posts.foreign_keys[0].referenced_table, ObjectName::new("Weblogs"));
        assert!(next.table(&"Weblogs".into()).is_some());
    }

    #[test]
    fn test_rename_column_updates_keys() {
        let model = SchemaModel::builder().table(blogs()).table(posts()).build().unwrap();
        let next = model
            .apply(&[MigrationOperation::RenameColumn {
                table: "Blogs".into(),
                name: "Id".into(),
                new_name: "BlogKey".into(),
            }])
            .unwrap();
        let blogs = next.table(&"Blogs".into()).unwrap();
        assert_eq!(blogs.primary_key.as_ref().unwrap().columns, vec!["BlogKey"]);
        let posts = next.table(&"Posts".into()).unwrap();
        assert_eq!(posts.foreign_keys[0].referenced_columns, vec!["BlogKey"]);
    }

    #[test]
    fn test_drop_column_in_use_fails() {
        let model = SchemaModel::builder().table(posts()).build().unwrap();
        let result = model.apply(&[MigrationOperation::DropColumn {
            table: "Posts".into(),
            column: "BlogId".into(),
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn test_alter_column_keeps_position() {
        let model = SchemaModel::builder().table(blogs()).build().unwrap();
        let old = Column::new("Url", ColumnType::text()).nullable();
        let new = Column::new("Url", ColumnType::varchar(200));
        let next = model
            .apply(&[MigrationOperation::AlterColumn {
                table: "Blogs".into(),
                column: new.clone(),
                old_column: old,
            }])
            .unwrap();
        assert_eq!(next.table(&"Blogs".into()).unwrap().columns[1], new);
    }

    #[test]
    fn test_is_destructive() {
        assert!(MigrationOperation::DropTable { name: "T".into() }.is_destructive());
        assert!(!MigrationOperation::sql("SELECT 1").is_destructive());
        let col = Column::new("A", ColumnType::Int32);
        let alter = MigrationOperation::AlterColumn {
            table: "T".into(),
            column: col.clone().nullable(),
            old_column: col,
        };
        assert!(!alter.is_destructive());
    }

    #[test]
    fn test_operation_json_shape() {
        let op = MigrationOperation::DropIndex {
            table: "T".into(),
            name: "IX".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "drop_index");
        let back: MigrationOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
