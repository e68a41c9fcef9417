//! Immutable relational schema model.
//!
//! A [`SchemaModel`] describes tables, columns, keys, indexes and sequences
//! independently of the entity types that produced it. One instance is kept
//! per migration snapshot; new states are built as new instances, either
//! through [`SchemaModelBuilder`] or by replaying operations with
//! [`SchemaModel::apply`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::operation::MigrationOperation;

/// A schema-qualified object name.
///
/// Ordering is ordinal on `(schema, name)`, which is the tie-break order the
/// differ uses for independent tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectName {
    /// Owning schema, `None` for the store's default schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Unqualified name.
    pub name: String,
}

impl ObjectName {
    /// Create a name in the default schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Create a schema-qualified name.
    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Same name under a different schema.
    pub fn with_schema(&self, schema: Option<String>) -> Self {
        Self {
            schema,
            name: self.name.clone(),
        }
    }

    /// Same schema with a different name.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            schema: self.schema.clone(),
            name: name.into(),
        }
    }
}

impl From<&str> for ObjectName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ObjectName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Semantic column type, mapped to store types by each dialect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    /// 16-bit integer.
    Int16,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Boolean.
    Boolean,
    /// Fixed-point decimal.
    Decimal {
        /// Total digits.
        precision: u8,
        /// Digits after the point.
        scale: u8,
    },
    /// Double precision float.
    Float64,
    /// Unicode text, unbounded when `max_length` is `None`.
    String {
        /// Maximum length in characters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
    },
    /// Binary data, unbounded when `max_length` is `None`.
    Binary {
        /// Maximum length in bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
    },
    /// Date and time.
    DateTime,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// 128-bit unique identifier.
    Guid,
    /// Store type passed through verbatim.
    Custom {
        /// Store type name.
        name: String,
    },
}

impl ColumnType {
    /// Unbounded text.
    pub fn text() -> Self {
        Self::String { max_length: None }
    }

    /// Bounded text.
    pub fn varchar(max_length: u32) -> Self {
        Self::String {
            max_length: Some(max_length),
        }
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default value as a SQL expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Column {
    /// Create a NOT NULL column without a default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
        }
    }

    /// Allow NULL.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the default SQL expression.
    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Same definition under a new name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Whether type or nullability differ (defaults are compared separately).
    pub fn shape_differs(&self, other: &Column) -> bool {
        self.column_type != other.column_type || self.nullable != other.nullable
    }
}

/// A primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Constraint name.
    pub name: String,
    /// Key columns in order.
    pub columns: Vec<String>,
}

impl PrimaryKey {
    /// Create a primary key.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// A foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Dependent columns in this table.
    pub columns: Vec<String>,
    /// Principal table.
    pub referenced_table: ObjectName,
    /// Principal columns, positionally matched with `columns`.
    pub referenced_columns: Vec<String>,
    /// Delete dependents when the principal row is deleted.
    #[serde(default)]
    pub cascade_delete: bool,
}

impl ForeignKey {
    /// Create a foreign key without cascade delete.
    pub fn new<I, S, J, T>(
        name: impl Into<String>,
        columns: I,
        referenced_table: impl Into<ObjectName>,
        referenced_columns: J,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            referenced_table: referenced_table.into(),
            referenced_columns: referenced_columns.into_iter().map(Into::into).collect(),
            cascade_delete: false,
        }
    }

    /// Enable cascade delete.
    pub fn cascade(mut self) -> Self {
        self.cascade_delete = true;
        self
    }
}

/// An index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    /// Create a non-unique index.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Constrained columns in order.
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    /// Create a unique constraint.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// A sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// Sequence name.
    pub name: ObjectName,
    /// First value.
    #[serde(default = "one")]
    pub start: i64,
    /// Increment.
    #[serde(default = "one")]
    pub increment: i64,
}

fn one() -> i64 {
    1
}

impl Sequence {
    /// Create a sequence starting at 1 with increment 1.
    pub fn new(name: impl Into<ObjectName>) -> Self {
        Self {
            name: name.into(),
            start: 1,
            increment: 1,
        }
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: ObjectName,
    /// Columns in positional order.
    pub columns: Vec<Column>,
    /// Primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKey>,
    /// Foreign keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
    /// Indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    /// Unique constraints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<ObjectName>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    /// Add a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key.
    pub fn primary_key<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = Some(PrimaryKey::new(name, columns));
        self
    }

    /// Add a foreign key.
    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Add an index.
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a unique constraint.
    pub fn unique(mut self, constraint: UniqueConstraint) -> Self {
        self.unique_constraints.push(constraint);
        self
    }

    /// Look up a column by name.
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    /// Look up a foreign key by name.
    pub fn find_foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    /// Look up an index by name.
    pub fn find_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|ix| ix.name == name)
    }

    /// Look up a unique constraint by name.
    pub fn find_unique(&self, name: &str) -> Option<&UniqueConstraint> {
        self.unique_constraints.iter().find(|uc| uc.name == name)
    }

    /// Order keys, indexes and constraints by name so equal tables compare equal
    /// regardless of the order they were declared or added in.
    pub(crate) fn normalize(&mut self) {
        self.foreign_keys.sort_by(|a, b| a.name.cmp(&b.name));
        self.indexes.sort_by(|a, b| a.name.cmp(&b.name));
        self.unique_constraints.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Names of keys, indexes and constraints that cover a column.
    pub(crate) fn dependents_of_column(&self, column: &str) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(pk) = &self.primary_key {
            if pk.columns.iter().any(|c| c == column) {
                names.push(pk.name.as_str());
            }
        }
        names.extend(
            self.foreign_keys
                .iter()
                .filter(|fk| fk.columns.iter().any(|c| c == column))
                .map(|fk| fk.name.as_str()),
        );
        names.extend(
            self.indexes
                .iter()
                .filter(|ix| ix.columns.iter().any(|c| c == column))
                .map(|ix| ix.name.as_str()),
        );
        names.extend(
            self.unique_constraints
                .iter()
                .filter(|uc| uc.columns.iter().any(|c| c == column))
                .map(|uc| uc.name.as_str()),
        );
        names
    }

    /// Check that every key, index and constraint references existing columns.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.name.name.is_empty() {
            return Err(MigrationError::invalid_schema("table name must not be empty"));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(MigrationError::invalid_schema(format!(
                    "duplicate column '{}' in table '{}'",
                    column.name, self.name
                )));
            }
        }

        let check = |kind: &str, name: &str, columns: &[String]| -> MigrateResult<()> {
            if columns.is_empty() {
                return Err(MigrationError::invalid_schema(format!(
                    "{} '{}' on table '{}' has no columns",
                    kind, name, self.name
                )));
            }
            for column in columns {
                if !seen.contains(column.as_str()) {
                    return Err(MigrationError::invalid_schema(format!(
                        "{} '{}' references unknown column '{}' in table '{}'",
                        kind, name, column, self.name
                    )));
                }
            }
            Ok(())
        };

        let mut object_names = HashSet::new();
        let mut unique_name = |name: &str| -> MigrateResult<()> {
            if object_names.insert(name.to_string()) {
                Ok(())
            } else {
                Err(MigrationError::invalid_schema(format!(
                    "duplicate constraint or index name '{}' in table '{}'",
                    name, self.name
                )))
            }
        };

        if let Some(pk) = &self.primary_key {
            check("primary key", &pk.name, &pk.columns)?;
            unique_name(&pk.name)?;
        }
        for fk in &self.foreign_keys {
            check("foreign key", &fk.name, &fk.columns)?;
            if fk.columns.len() != fk.referenced_columns.len() {
                return Err(MigrationError::invalid_schema(format!(
                    "foreign key '{}' on table '{}' maps {} columns onto {}",
                    fk.name,
                    self.name,
                    fk.columns.len(),
                    fk.referenced_columns.len()
                )));
            }
            unique_name(&fk.name)?;
        }
        for index in &self.indexes {
            check("index", &index.name, &index.columns)?;
            unique_name(&index.name)?;
        }
        for uc in &self.unique_constraints {
            check("unique constraint", &uc.name, &uc.columns)?;
            unique_name(&uc.name)?;
        }
        Ok(())
    }
}

/// Immutable snapshot of a relational schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ModelSnapshot", into = "ModelSnapshot")]
pub struct SchemaModel {
    tables: BTreeMap<ObjectName, Table>,
    sequences: BTreeMap<ObjectName, Sequence>,
}

impl SchemaModel {
    /// The empty model, source of the very first migration.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a model.
    pub fn builder() -> SchemaModelBuilder {
        SchemaModelBuilder::default()
    }

    /// Tables in ordinal name order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Look up a table.
    pub fn table(&self, name: &ObjectName) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Check whether a table exists.
    pub fn contains_table(&self, name: &ObjectName) -> bool {
        self.tables.contains_key(name)
    }

    /// Sequences in ordinal name order.
    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.values()
    }

    /// Look up a sequence.
    pub fn sequence(&self, name: &ObjectName) -> Option<&Sequence> {
        self.sequences.get(name)
    }

    /// Check whether the model has no tables and no sequences.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.sequences.is_empty()
    }

    /// Foreign keys anywhere in the model that reference `table`, as
    /// `(dependent table, foreign key)` pairs.
    pub fn references_to<'a>(
        &'a self,
        table: &'a ObjectName,
    ) -> impl Iterator<Item = (&'a Table, &'a ForeignKey)> + 'a {
        self.tables.values().flat_map(move |t| {
            t.foreign_keys
                .iter()
                .filter(move |fk| &fk.referenced_table == table)
                .map(move |fk| (t, fk))
        })
    }

    /// Build the model that results from applying `operations` in order.
    ///
    /// `self` is left untouched.
    pub fn apply(&self, operations: &[MigrationOperation]) -> MigrateResult<SchemaModel> {
        let mut next = self.clone();
        for operation in operations {
            operation.apply_to(&mut next)?;
        }
        Ok(next)
    }

    pub(crate) fn tables_mut(&mut self) -> &mut BTreeMap<ObjectName, Table> {
        &mut self.tables
    }

    pub(crate) fn sequences_mut(&mut self) -> &mut BTreeMap<ObjectName, Sequence> {
        &mut self.sequences
    }

    pub(crate) fn table_mut(&mut self, name: &ObjectName) -> MigrateResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| MigrationError::invalid_schema(format!("table '{}' does not exist", name)))
    }

    pub(crate) fn require_table(&self, name: &ObjectName) -> MigrateResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrationError::invalid_schema(format!("table '{}' does not exist", name)))
    }
}

/// Builder for [`SchemaModel`].
#[derive(Debug, Default)]
pub struct SchemaModelBuilder {
    tables: Vec<Table>,
    sequences: Vec<Sequence>,
}

impl SchemaModelBuilder {
    /// Add a table.
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Add a sequence.
    pub fn sequence(mut self, sequence: Sequence) -> Self {
        self.sequences.push(sequence);
        self
    }

    /// Validate and build the model.
    pub fn build(self) -> MigrateResult<SchemaModel> {
        let mut model = SchemaModel::default();
        for mut table in self.tables {
            table.validate()?;
            table.normalize();
            if model.tables.contains_key(&table.name) {
                return Err(MigrationError::invalid_schema(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
            model.tables.insert(table.name.clone(), table);
        }
        for sequence in self.sequences {
            if model.sequences.contains_key(&sequence.name) {
                return Err(MigrationError::invalid_schema(format!(
                    "duplicate sequence '{}'",
                    sequence.name
                )));
            }
            model.sequences.insert(sequence.name.clone(), sequence);
        }
        Ok(model)
    }
}

/// Serialized form of a model snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelSnapshot {
    #[serde(default)]
    tables: Vec<Table>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sequences: Vec<Sequence>,
}

impl TryFrom<ModelSnapshot> for SchemaModel {
    type Error = MigrationError;

    fn try_from(snapshot: ModelSnapshot) -> Result<Self, Self::Error> {
        let mut builder = SchemaModel::builder();
        for table in snapshot.tables {
            builder = builder.table(table);
        }
        for sequence in snapshot.sequences {
            builder = builder.sequence(sequence);
        }
        builder.build()
    }
}

impl From<SchemaModel> for ModelSnapshot {
    fn from(model: SchemaModel) -> Self {
        Self {
            tables: model.tables.into_values().collect(),
            sequences: model.sequences.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blogs() -> Table {
        Table::new("Blogs")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("Url", ColumnType::text()).nullable())
            .primary_key("PK_Blogs", ["Id"])
    }

    #[test]
    fn test_object_name_ordering() {
        let mut names = vec![
            ObjectName::new("b"),
            ObjectName::qualified("dbo", "a"),
            ObjectName::new("a"),
        ];
        names.sort();
        assert_eq!(names[0], ObjectName::new("a"));
        assert_eq!(names[1], ObjectName::new("b"));
        assert_eq!(names[2].to_string(), "dbo.a");
    }

    #[test]
    fn test_build_model() {
        let model = SchemaModel::builder().table(blogs()).build().unwrap();
        let table = model.table(&"Blogs".into()).unwrap();
        assert_eq!(table.columns.len(), 2);
        assert!(table.has_column("Url"));
        assert!(!model.is_empty());
    }

    #[test]
    fn test_rejects_unknown_key_column() {
        let table = Table::new("Posts")
            .column(Column::new("Id", ColumnType::Int32))
            .primary_key("PK_Posts", ["PostId"]);
        let err = SchemaModel::builder().table(table).build().unwrap_err();
        assert!(err.to_string().contains("unknown column 'PostId'"));
    }

    #[test]
    fn test_rejects_mismatched_foreign_key() {
        let table = Table::new("Posts")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("BlogId", ColumnType::Int32))
            .foreign_key(ForeignKey::new("FK_Posts_Blogs", ["BlogId"], "Blogs", ["Id", "Other"]));
        assert!(SchemaModel::builder().table(table).build().is_err());
    }

    #[test]
    fn test_rejects_duplicates() {
        let table = Table::new("T")
            .column(Column::new("A", ColumnType::Int32))
            .column(Column::new("A", ColumnType::Int64));
        assert!(SchemaModel::builder().table(table).build().is_err());

        assert!(SchemaModel::builder().table(blogs()).table(blogs()).build().is_err());

        let table = Table::new("T")
            .column(Column::new("A", ColumnType::Int32))
            .primary_key("X", ["A"])
            .index(Index::new("X", ["A"]));
        assert!(SchemaModel::builder().table(table).build().is_err());
    }

    #[test]
    fn test_snapshot_json() {
        let model = SchemaModel::builder()
            .table(blogs().index(Index::new("IX_Blogs_Url", ["Url"]).unique()))
            .sequence(Sequence::new(ObjectName::qualified("dbo", "OrderNumbers")))
            .build()
            .unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let back: SchemaModel = serde_json::from_str(&json).unwrap();
        assert_eq!(model, back);
    }

    #[test]
    fn test_snapshot_json_is_validated() {
        let json = r#"{"tables":[{"name":{"name":"T"},"columns":[],"primary_key":{"name":"PK","columns":["Id"]}}]}"#;
        assert!(serde_json::from_str::<SchemaModel>(json).is_err());
    }

    #[test]
    fn test_references_to() {
        let posts = Table::new("Posts")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("BlogId", ColumnType::Int32))
            .foreign_key(ForeignKey::new("FK_Posts_Blogs", ["BlogId"], "Blogs", ["Id"]));
        let model = SchemaModel::builder().table(blogs()).table(posts).build().unwrap();
        let blogs_name = ObjectName::new("Blogs");
        let refs: Vec<_> = model.references_to(&blogs_name).map(|(t, fk)| (t.name.name.as_str(), fk.name.as_str())).collect();
        assert_eq!(refs, vec![("Posts", "FK_Posts_Blogs")]);
    }
}
