//! Schema diffing for generating migrations.
//!
//! [`ModelDiffer::diff`] compares two [`SchemaModel`]s and returns the ordered
//! operations that turn the source into the target. Operations are grouped so
//! that foreign keys are dropped before anything they reference, tables are
//! dropped dependents first, and tables are created principals first with
//! circular or self-referencing foreign keys added afterwards.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::model::{ForeignKey, Index, ObjectName, SchemaModel, Table};
use crate::operation::MigrationOperation;

/// Explicit rename annotations.
///
/// Names alone cannot tell a rename from a drop and a create, so without a
/// hint a renamed table or column is diffed as drop + create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameHints {
    tables: Vec<(ObjectName, ObjectName)>,
    columns: Vec<(ObjectName, String, String)>,
}

impl RenameHints {
    /// Create empty hints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `from` in the source as renamed (or moved) to `to` in the target.
    pub fn rename_table(mut self, from: impl Into<ObjectName>, to: impl Into<ObjectName>) -> Self {
        self.tables.push((from.into(), to.into()));
        self
    }

    /// Mark a column of `table` (target name) as renamed.
    pub fn rename_column(
        mut self,
        table: impl Into<ObjectName>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.columns.push((table.into(), from.into(), to.into()));
        self
    }

    /// Check whether no renames are annotated.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }

    /// Hints for diffing in the opposite direction.
    pub fn inverse(&self) -> Self {
        let tables = self
            .tables
            .iter()
            .map(|(from, to)| (to.clone(), from.clone()))
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|(table, from, to)| {
                let source_table = self
                    .tables
                    .iter()
                    .find(|(_, renamed)| renamed == table)
                    .map_or_else(|| table.clone(), |(original, _)| original.clone());
                (source_table, to.clone(), from.clone())
            })
            .collect();
        Self { tables, columns }
    }

    fn table_target(&self, source: &ObjectName) -> Option<&ObjectName> {
        self.tables
            .iter()
            .find(|(from, _)| from == source)
            .map(|(_, to)| to)
    }

    fn column_target<'a>(&'a self, table: &ObjectName, column: &'a str) -> &'a str {
        self.columns
            .iter()
            .find(|(t, from, _)| t == table && from == column)
            .map_or(column, |(_, _, to)| to.as_str())
    }
}

/// Computes ordered operations between two schema models.
#[derive(Debug, Clone, Default)]
pub struct ModelDiffer {
    hints: RenameHints,
}

/// Operation groups, emitted in declaration order.
#[derive(Default)]
struct Groups {
    drop_foreign_keys: Vec<MigrationOperation>,
    drop_tables: Vec<MigrationOperation>,
    other_drops: Vec<MigrationOperation>,
    drop_columns: Vec<MigrationOperation>,
    schemas: Vec<MigrationOperation>,
    rename_tables: Vec<MigrationOperation>,
    renames: Vec<MigrationOperation>,
    create_sequences: Vec<MigrationOperation>,
    columns: Vec<MigrationOperation>,
    create_tables: Vec<MigrationOperation>,
    add_keys: Vec<MigrationOperation>,
    add_foreign_keys: Vec<MigrationOperation>,
    create_indexes: Vec<MigrationOperation>,
}

impl Groups {
    fn into_operations(self) -> Vec<MigrationOperation> {
        let mut ops = self.drop_foreign_keys;
        ops.extend(self.drop_tables);
        ops.extend(self.other_drops);
        ops.extend(self.drop_columns);
        ops.extend(self.schemas);
        ops.extend(self.rename_tables);
        ops.extend(self.renames);
        ops.extend(self.create_sequences);
        ops.extend(self.columns);
        ops.extend(self.create_tables);
        ops.extend(self.add_keys);
        ops.extend(self.add_foreign_keys);
        ops.extend(self.create_indexes);
        ops
    }
}

impl ModelDiffer {
    /// Create a differ without rename hints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit rename hints.
    pub fn with_renames(mut self, hints: RenameHints) -> Self {
        self.hints = hints;
        self
    }

    /// A differ for the opposite direction, used for downgrade operations.
    pub fn inverse(&self) -> Self {
        Self {
            hints: self.hints.inverse(),
        }
    }

    /// Check whether the two models differ.
    pub fn has_differences(&self, source: &SchemaModel, target: &SchemaModel) -> MigrateResult<bool> {
        Ok(!self.diff(source, target)?.is_empty())
    }

    /// Compute the operations that turn `source` into `target`.
    pub fn diff(
        &self,
        source: &SchemaModel,
        target: &SchemaModel,
    ) -> MigrateResult<Vec<MigrationOperation>> {
        let mut groups = Groups::default();

        let pairs = self.pair_tables(source, target);
        let paired_targets: HashSet<&ObjectName> = pairs.iter().map(|(_, t)| &t.name).collect();
        let paired_sources: HashSet<&ObjectName> = pairs.iter().map(|(s, _)| &s.name).collect();

        let dropped: Vec<&Table> = source
            .tables()
            .filter(|t| !paired_sources.contains(&t.name))
            .collect();
        let created: Vec<&Table> = target
            .tables()
            .filter(|t| !paired_targets.contains(&t.name))
            .collect();

        let altered = self.altered_columns(&pairs);

        self.drop_tables(&dropped, &mut groups);

        for (src, tgt) in &pairs {
            self.diff_table(src, tgt, &altered, &mut groups);
        }

        self.diff_sequences(source, target, &mut groups);
        self.create_tables(&created, &mut groups)?;

        let ops = groups.into_operations();
        for op in ops.iter().filter(|op| op.is_destructive()) {
            warn!(
                operation = op.kind(),
                table = %op.table().map(|t| t.to_string()).unwrap_or_default(),
                "Operation may cause data loss"
            );
        }
        debug!(operations = ops.len(), "Computed schema diff");
        Ok(ops)
    }

    /// Match source tables to target tables by name or rename hint, ordered by
    /// target name.
    fn pair_tables<'a>(
        &self,
        source: &'a SchemaModel,
        target: &'a SchemaModel,
    ) -> Vec<(&'a Table, &'a Table)> {
        let mut pairs: BTreeMap<&ObjectName, (&Table, &Table)> = BTreeMap::new();
        let mut claimed: HashSet<&ObjectName> = HashSet::new();

        for src in source.tables() {
            if let Some(to) = self.hints.table_target(&src.name) {
                match target.table(to) {
                    Some(tgt) => {
                        claimed.insert(&tgt.name);
                        pairs.insert(&tgt.name, (src, tgt));
                    }
                    None => debug!(from = %src.name, to = %to, "Ignoring rename hint with no target table"),
                }
            }
        }
        for src in source.tables() {
            if self.hints.table_target(&src.name).is_some_and(|to| target.contains_table(to)) {
                continue;
            }
            if let Some(tgt) = target.table(&src.name) {
                if claimed.insert(&tgt.name) {
                    pairs.insert(&tgt.name, (src, tgt));
                }
            }
        }
        pairs.into_values().collect()
    }

    /// Target table name for a source table name.
    fn map_table(&self, name: &ObjectName) -> ObjectName {
        self.hints.table_target(name).cloned().unwrap_or_else(|| name.clone())
    }

    fn map_columns(&self, table: &ObjectName, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .map(|c| self.hints.column_target(table, c).to_string())
            .collect()
    }

    /// Source foreign key expressed in target names.
    fn map_foreign_key(&self, table: &ObjectName, fk: &ForeignKey) -> ForeignKey {
        let referenced_table = self.map_table(&fk.referenced_table);
        ForeignKey {
            name: fk.name.clone(),
            columns: self.map_columns(table, &fk.columns),
            referenced_columns: self.map_columns(&referenced_table, &fk.referenced_columns),
            referenced_table,
            cascade_delete: fk.cascade_delete,
        }
    }

    /// Columns (target table, target column) whose type or nullability change.
    fn altered_columns(&self, pairs: &[(&Table, &Table)]) -> HashSet<(ObjectName, String)> {
        let mut altered = HashSet::new();
        for (src, tgt) in pairs {
            for column in &src.columns {
                let name = self.hints.column_target(&tgt.name, &column.name);
                if let Some(target_column) = tgt.find_column(name) {
                    if column.shape_differs(target_column) {
                        altered.insert((tgt.name.clone(), name.to_string()));
                    }
                }
            }
        }
        altered
    }

    fn diff_table(
        &self,
        src: &Table,
        tgt: &Table,
        altered: &HashSet<(ObjectName, String)>,
        groups: &mut Groups,
    ) {
        let t = &tgt.name;
        let covers = |table: &ObjectName, columns: &[String]| {
            columns
                .iter()
                .any(|c| altered.contains(&(table.clone(), c.clone())))
        };

        // Table identity.
        let mut current = src.name.clone();
        if current.schema != t.schema {
            groups.schemas.push(MigrationOperation::MoveTableToSchema {
                name: current.clone(),
                new_schema: t.schema.clone(),
            });
            current = current.with_schema(t.schema.clone());
        }
        if current.name != t.name {
            groups.rename_tables.push(MigrationOperation::RenameTable {
                name: current,
                new_name: t.name.clone(),
            });
        }

        // Foreign keys.
        for fk in &src.foreign_keys {
            let mapped = self.map_foreign_key(t, fk);
            let keep = tgt.find_foreign_key(&fk.name).is_some_and(|target_fk| {
                *target_fk == mapped
                    && !covers(t, &mapped.columns)
                    && !covers(&mapped.referenced_table, &mapped.referenced_columns)
            });
            if !keep {
                groups.drop_foreign_keys.push(MigrationOperation::DropForeignKey {
                    table: src.name.clone(),
                    name: fk.name.clone(),
                });
            }
        }
        for fk in &tgt.foreign_keys {
            let kept = src.find_foreign_key(&fk.name).is_some_and(|source_fk| {
                self.map_foreign_key(t, source_fk) == *fk
                    && !covers(t, &fk.columns)
                    && !covers(&fk.referenced_table, &fk.referenced_columns)
            });
            if !kept {
                groups.add_foreign_keys.push(MigrationOperation::AddForeignKey {
                    table: t.clone(),
                    foreign_key: fk.clone(),
                });
            }
        }

        // Primary key.
        let source_pk = src.primary_key.as_ref().map(|pk| {
            let mut mapped = pk.clone();
            mapped.columns = self.map_columns(t, &pk.columns);
            mapped
        });
        let pk_changed =
            source_pk != tgt.primary_key || tgt.primary_key.as_ref().is_some_and(|pk| covers(t, &pk.columns));
        if pk_changed {
            if let Some(pk) = &src.primary_key {
                groups.other_drops.push(MigrationOperation::DropPrimaryKey {
                    table: src.name.clone(),
                    name: pk.name.clone(),
                });
            }
            if let Some(pk) = &tgt.primary_key {
                groups.add_keys.push(MigrationOperation::AddPrimaryKey {
                    table: t.clone(),
                    primary_key: pk.clone(),
                });
            }
        }

        // Unique constraints.
        let unique_kept = |name: &str| {
            match (src.find_unique(name), tgt.find_unique(name)) {
                (Some(s), Some(g)) => self.map_columns(t, &s.columns) == g.columns && !covers(t, &g.columns),
                _ => false,
            }
        };
        for uc in &src.unique_constraints {
            if !unique_kept(&uc.name) {
                groups.other_drops.push(MigrationOperation::DropUniqueConstraint {
                    table: src.name.clone(),
                    name: uc.name.clone(),
                });
            }
        }
        for uc in &tgt.unique_constraints {
            if !unique_kept(&uc.name) {
                groups.add_keys.push(MigrationOperation::AddUniqueConstraint {
                    table: t.clone(),
                    constraint: uc.clone(),
                });
            }
        }

        // Indexes, with same-definition matches turned into renames.
        let mut matched_targets: HashSet<&str> = HashSet::new();
        for index in &src.indexes {
            let columns = self.map_columns(t, &index.columns);
            let same = |target: &&Index| {
                target.columns == columns && target.unique == index.unique && !covers(t, &target.columns)
            };
            if let Some(target) = tgt.find_index(&index.name).filter(same) {
                matched_targets.insert(target.name.as_str());
                continue;
            }
            let renamed = tgt.indexes.iter().find(|candidate| {
                same(candidate)
                    && src.find_index(&candidate.name).is_none()
                    && !matched_targets.contains(candidate.name.as_str())
            });
            match renamed {
                Some(target) => {
                    matched_targets.insert(target.name.as_str());
                    groups.renames.push(MigrationOperation::RenameIndex {
                        table: t.clone(),
                        name: index.name.clone(),
                        new_name: target.name.clone(),
                    });
                }
                None => groups.other_drops.push(MigrationOperation::DropIndex {
                    table: src.name.clone(),
                    name: index.name.clone(),
                }),
            }
        }
        for index in &tgt.indexes {
            if !matched_targets.contains(index.name.as_str()) {
                groups.create_indexes.push(MigrationOperation::CreateIndex {
                    table: t.clone(),
                    index: index.clone(),
                });
            }
        }

        // Columns.
        let mut paired_columns: HashSet<&str> = HashSet::new();
        for column in &src.columns {
            let name = self.hints.column_target(t, &column.name);
            let Some(target_column) = tgt.find_column(name) else {
                groups.drop_columns.push(MigrationOperation::DropColumn {
                    table: src.name.clone(),
                    column: column.name.clone(),
                });
                continue;
            };
            paired_columns.insert(target_column.name.as_str());

            if name != column.name {
                groups.renames.push(MigrationOperation::RenameColumn {
                    table: t.clone(),
                    name: column.name.clone(),
                    new_name: name.to_string(),
                });
            }

            if column.shape_differs(target_column) {
                groups.columns.push(MigrationOperation::AlterColumn {
                    table: t.clone(),
                    column: target_column.clone(),
                    old_column: column.renamed(name),
                });
            } else if column.default != target_column.default {
                if column.default.is_some() {
                    groups.columns.push(MigrationOperation::DropDefaultConstraint {
                        table: t.clone(),
                        column: name.to_string(),
                    });
                }
                if let Some(default) = &target_column.default {
                    groups.columns.push(MigrationOperation::AddDefaultConstraint {
                        table: t.clone(),
                        column: name.to_string(),
                        default: default.clone(),
                    });
                }
            }
        }
        for column in &tgt.columns {
            if !paired_columns.contains(column.name.as_str()) {
                groups.columns.push(MigrationOperation::AddColumn {
                    table: t.clone(),
                    column: column.clone(),
                });
            }
        }
    }

    fn diff_sequences(&self, source: &SchemaModel, target: &SchemaModel, groups: &mut Groups) {
        for sequence in source.sequences() {
            if target.sequence(&sequence.name) != Some(sequence) {
                groups.other_drops.push(MigrationOperation::DropSequence {
                    name: sequence.name.clone(),
                });
            }
        }
        for sequence in target.sequences() {
            if source.sequence(&sequence.name) != Some(sequence) {
                groups.create_sequences.push(MigrationOperation::CreateSequence {
                    sequence: sequence.clone(),
                });
            }
        }
    }

    /// Drop tables dependents first, dropping foreign keys to break cycles.
    fn drop_tables(&self, dropped: &[&Table], groups: &mut Groups) {
        let names: BTreeSet<&ObjectName> = dropped.iter().map(|t| &t.name).collect();
        let by_name: BTreeMap<&ObjectName, &Table> = dropped.iter().map(|t| (&t.name, *t)).collect();

        let mut edges: Vec<Edge<'_>> = Vec::new();
        for table in dropped {
            for fk in &table.foreign_keys {
                if fk.referenced_table != table.name && names.contains(&fk.referenced_table) {
                    edges.push(Edge {
                        dependent: &table.name,
                        principal: &fk.referenced_table,
                        foreign_key: fk,
                    });
                }
            }
        }

        // A table is ready once nothing left references it.
        let order = topological_order(
            &names,
            &mut edges,
            |edge| (edge.dependent, edge.principal),
            |cyclic| cyclic.first().copied(),
            |edge| {
                groups.drop_foreign_keys.push(MigrationOperation::DropForeignKey {
                    table: edge.dependent.clone(),
                    name: edge.foreign_key.name.clone(),
                });
            },
        );

        // Cycles can always be broken for drops.
        let order = order.unwrap_or_default();
        for name in order {
            if let Some(table) = by_name.get(name) {
                groups.drop_tables.push(MigrationOperation::DropTable {
                    name: table.name.clone(),
                });
            }
        }
    }

    /// Create tables principals first, deferring self references and one
    /// nullable foreign key per unbreakable cycle.
    fn create_tables(&self, created: &[&Table], groups: &mut Groups) -> MigrateResult<()> {
        let names: BTreeSet<&ObjectName> = created.iter().map(|t| &t.name).collect();
        let by_name: BTreeMap<&ObjectName, &Table> = created.iter().map(|t| (&t.name, *t)).collect();

        let mut edges: Vec<Edge<'_>> = Vec::new();
        for table in created {
            for fk in &table.foreign_keys {
                if fk.referenced_table != table.name && names.contains(&fk.referenced_table) {
                    edges.push(Edge {
                        dependent: &table.name,
                        principal: &fk.referenced_table,
                        foreign_key: fk,
                    });
                }
            }
        }

        let mut deferred: Vec<(&ObjectName, &ForeignKey)> = Vec::new();
        let order = topological_order(
            &names,
            &mut edges,
            |edge| (edge.principal, edge.dependent),
            |cyclic| {
                cyclic.iter().copied().find(|edge| {
                    by_name.get(edge.dependent).is_some_and(|table| {
                        edge.foreign_key
                            .columns
                            .iter()
                            .all(|c| table.find_column(c).is_some_and(|col| col.nullable))
                    })
                })
            },
            |edge| deferred.push((edge.dependent, edge.foreign_key)),
        );

        let order = order.map_err(|tables| MigrationError::UnresolvableForeignKeyCycle {
            tables: tables.iter().map(|t| t.to_string()).collect(),
        })?;

        let mut added_keys = Vec::new();
        let mut created_indexes = Vec::new();
        for name in order {
            let Some(table) = by_name.get(name) else {
                continue;
            };
            let mut definition = (*table).clone();
            definition.indexes.clear();
            definition.foreign_keys.retain(|fk| {
                let is_deferred = fk.referenced_table == table.name
                    || deferred
                        .iter()
                        .any(|(dependent, d)| *dependent == &table.name && d.name == fk.name);
                if is_deferred {
                    added_keys.push(MigrationOperation::AddForeignKey {
                        table: table.name.clone(),
                        foreign_key: fk.clone(),
                    });
                }
                !is_deferred
            });
            for index in &table.indexes {
                created_indexes.push(MigrationOperation::CreateIndex {
                    table: table.name.clone(),
                    index: index.clone(),
                });
            }
            groups
                .create_tables
                .push(MigrationOperation::CreateTable { table: definition });
        }

        groups.add_foreign_keys.extend(added_keys);
        groups.create_indexes.extend(created_indexes);
        Ok(())
    }
}

/// A foreign key between two tables taking part in the same create or drop.
#[derive(Clone, Copy)]
struct Edge<'a> {
    dependent: &'a ObjectName,
    principal: &'a ObjectName,
    foreign_key: &'a ForeignKey,
}

/// Kahn's algorithm over `nodes`, picking the ordinally smallest ready node.
///
/// `direction` maps an edge to `(before, after)`. When the remaining graph is
/// cyclic, `choose` picks an edge to remove from the edges inside the cycles,
/// `on_break` records it, and sorting continues. If `choose` declines, the
/// tables left in the cycles are returned as the error.
fn topological_order<'a>(
    nodes: &BTreeSet<&'a ObjectName>,
    edges: &mut Vec<Edge<'a>>,
    direction: impl Fn(&Edge<'a>) -> (&'a ObjectName, &'a ObjectName),
    mut choose: impl FnMut(&[Edge<'a>]) -> Option<Edge<'a>>,
    mut on_break: impl FnMut(&Edge<'a>),
) -> Result<Vec<&'a ObjectName>, Vec<&'a ObjectName>> {
    let mut remaining: BTreeSet<&ObjectName> = nodes.clone();
    let mut order = Vec::with_capacity(nodes.len());

    while !remaining.is_empty() {
        let blocked: HashSet<&ObjectName> = edges
            .iter()
            .filter(|edge| {
                let (before, after) = direction(*edge);
                remaining.contains(before) && remaining.contains(after)
            })
            .map(|edge| direction(edge).1)
            .collect();

        if let Some(next) = remaining.iter().copied().find(|n| !blocked.contains(n)) {
            remaining.remove(next);
            order.push(next);
            continue;
        }

        // Every remaining node waits on another; trim nodes that nothing
        // remaining waits on so only cycle members are left.
        let mut cyclic_nodes = remaining.clone();
        loop {
            let waited_on: HashSet<&ObjectName> = edges
                .iter()
                .map(|edge| direction(edge))
                .filter(|(before, after)| cyclic_nodes.contains(before) && cyclic_nodes.contains(after))
                .map(|(before, _)| before)
                .collect();
            let before = cyclic_nodes.len();
            cyclic_nodes.retain(|n| waited_on.contains(n));
            if cyclic_nodes.len() == before {
                break;
            }
        }

        let mut cyclic_edges: Vec<Edge<'a>> = edges
            .iter()
            .copied()
            .filter(|edge| {
                let (before, after) = direction(edge);
                cyclic_nodes.contains(before) && cyclic_nodes.contains(after)
            })
            .collect();
        cyclic_edges.sort_by(|a, b| {
            (a.dependent, &a.foreign_key.name).cmp(&(b.dependent, &b.foreign_key.name))
        });

        let Some(broken) = choose(&cyclic_edges) else {
            return Err(cyclic_nodes.into_iter().collect());
        };
        debug!(
            table = %broken.dependent,
            foreign_key = %broken.foreign_key.name,
            "Breaking foreign key cycle"
        );
        on_break(&broken);
        edges.retain(|edge| {
            !(edge.dependent == broken.dependent && edge.foreign_key.name == broken.foreign_key.name)
        });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Column, ColumnType, Sequence, UniqueConstraint};

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
            .index(Index::new("IX_Posts_BlogId", ["BlogId"]))
    }

    fn model(tables: Vec<Table>) -> SchemaModel {
        tables
            .into_iter()
            .fold(SchemaModel::builder(), |b, t| b.table(t))
            .build()
            .unwrap()
    }

    fn kinds(ops: &[MigrationOperation]) -> Vec<String> {
        ops.iter()
            .map(|op| format!("{} {}", op.kind(), op.table().map(|t| t.to_string()).unwrap_or_default()))
            .collect()
    }

    fn position(ops: &[MigrationOperation], pred: impl Fn(&MigrationOperation) -> bool) -> usize {
        ops.iter().position(pred).unwrap()
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let schema = model(vec![blogs(), posts()]);
        let ops = ModelDiffer::new().diff(&schema, &schema).unwrap();
        assert!(ops.is_empty());
        assert!(!ModelDiffer::new().has_differences(&schema, &schema).unwrap());
    }

    #[test]
    fn test_create_principal_first() {
        let target = model(vec![posts(), blogs()]);
        let ops = ModelDiffer::new().diff(&SchemaModel::empty(), &target).unwrap();
        assert_eq!(
            kinds(&ops),
            vec!["CreateTable Blogs", "CreateTable Posts", "CreateIndex Posts"]
        );
        match &ops[1] {
            MigrationOperation::CreateTable { table } => {
                assert_eq!(table.foreign_keys.len(), 1);
                assert!(table.indexes.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_independent_tables_in_ordinal_order() {
        let a = Table::new("Alpha").column(Column::new("Id", ColumnType::Int32));
        let z = Table::new("Zeta").column(Column::new("Id", ColumnType::Int32));
        let m = Table::new("Mu").column(Column::new("Id", ColumnType::Int32));
        let ops = ModelDiffer::new()
            .diff(&SchemaModel::empty(), &model(vec![z, a, m]))
            .unwrap();
        assert_eq!(
            kinds(&ops),
            vec!["CreateTable Alpha", "CreateTable Mu", "CreateTable Zeta"]
        );
    }

    #[test]
    fn test_self_reference_is_deferred() {
        let nodes = Table::new("Nodes")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("ParentId", ColumnType::Int32).nullable())
            .primary_key("PK_Nodes", ["Id"])
            .foreign_key(ForeignKey::new("FK_Nodes_Parent", ["ParentId"], "Nodes", ["Id"]));
        let ops = ModelDiffer::new()
            .diff(&SchemaModel::empty(), &model(vec![nodes]))
            .unwrap();
        assert_eq!(kinds(&ops), vec!["CreateTable Nodes", "AddForeignKey Nodes"]);
    }

    fn cycle(nullable: bool) -> SchemaModel {
        let a_ref = Column::new("BId", ColumnType::Int32);
        let a_ref = if nullable { a_ref.nullable() } else { a_ref };
        let a = Table::new("A")
            .column(Column::new("Id", ColumnType::Int32))
            .column(a_ref)
            .primary_key("PK_A", ["Id"])
            .foreign_key(ForeignKey::new("FK_A_B", ["BId"], "B", ["Id"]));
        let b = Table::new("B")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("AId", ColumnType::Int32))
            .primary_key("PK_B", ["Id"])
            .foreign_key(ForeignKey::new("FK_B_A", ["AId"], "A", ["Id"]));
        model(vec![a, b])
    }

    #[test]
    fn test_nullable_cycle_is_deferred() {
        let ops = ModelDiffer::new().diff(&SchemaModel::empty(), &cycle(true)).unwrap();
        assert_eq!(
            kinds(&ops),
            vec!["CreateTable A", "CreateTable B", "AddForeignKey A"]
        );
        let upgraded = SchemaModel::empty().apply(&ops).unwrap();
        assert_eq!(upgraded, cycle(true));
    }

    #[test]
    fn test_not_null_cycle_is_fatal() {
        let err = ModelDiffer::new()
            .diff(&SchemaModel::empty(), &cycle(false))
            .unwrap_err();
        match err {
            MigrationError::UnresolvableForeignKeyCycle { tables } => {
                assert_eq!(tables, vec!["A", "B"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_drop_cycle_drops_foreign_key_first() {
        let ops = ModelDiffer::new().diff(&cycle(false), &SchemaModel::empty()).unwrap();
        assert_eq!(
            kinds(&ops),
            vec!["DropForeignKey A", "DropTable B", "DropTable A"]
        );
        assert!(cycle(false).apply(&ops).unwrap().is_empty());
    }

    #[test]
    fn test_drop_dependents_first() {
        let ops = ModelDiffer::new()
            .diff(&model(vec![blogs(), posts()]), &SchemaModel::empty())
            .unwrap();
        assert_eq!(kinds(&ops), vec!["DropTable Posts", "DropTable Blogs"]);
    }

    #[test]
    fn test_dropping_principal_drops_foreign_key_first() {
        let source = model(vec![blogs(), posts()]);
        let mut detached = posts();
        detached.foreign_keys.clear();
        let target = model(vec![detached]);

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        let drop_fk = position(&ops, |op| matches!(op, MigrationOperation::DropForeignKey { .. }));
        let drop_table = position(&ops, |op| matches!(op, MigrationOperation::DropTable { .. }));
        assert!(drop_fk < drop_table);
        assert_eq!(source.apply(&ops).unwrap(), target);
    }

    #[test]
    fn test_add_foreign_key_after_create_table() {
        let source = model(vec![Table::new("Posts")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("BlogId", ColumnType::Int32))
            .primary_key("PK_Posts", ["Id"])]);
        let target = model(vec![blogs(), posts()]);

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        let create = position(&ops, |op| matches!(op, MigrationOperation::CreateTable { .. }));
        let add_fk = position(&ops, |op| matches!(op, MigrationOperation::AddForeignKey { .. }));
        assert!(create < add_fk);
        assert_eq!(source.apply(&ops).unwrap(), target);
    }

    #[test]
    fn test_rename_without_hint_is_drop_and_create() {
        let source = model(vec![blogs()]);
        let mut renamed = blogs();
        renamed.name = ObjectName::new("Weblogs");
        let target = model(vec![renamed]);

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        assert_eq!(kinds(&ops), vec!["DropTable Blogs", "CreateTable Weblogs"]);
    }

    #[test]
    fn test_rename_with_hints() {
        let source = model(vec![blogs(), posts()]);
        let mut weblogs = blogs();
        weblogs.name = ObjectName::new("Weblogs");
        weblogs.columns[1].name = "Address".to_string();
        let mut entries = posts();
        entries.foreign_keys[0].referenced_table = ObjectName::new("Weblogs");
        let target = model(vec![weblogs, entries]);

        let hints = RenameHints::new()
            .rename_table("Blogs", "Weblogs")
            .rename_column("Weblogs", "Url", "Address");
        let differ = ModelDiffer::new().with_renames(hints);
        let ops = differ.diff(&source, &target).unwrap();
        assert_eq!(kinds(&ops), vec!["RenameTable Blogs", "RenameColumn Weblogs"]);
        assert_eq!(source.apply(&ops).unwrap(), target);

        let back = differ.inverse().diff(&target, &source).unwrap();
        assert_eq!(kinds(&back), vec!["RenameTable Weblogs", "RenameColumn Blogs"]);
        assert_eq!(target.apply(&back).unwrap(), source);
    }

    #[test]
    fn test_move_to_schema() {
        let source = model(vec![blogs()]);
        let mut moved = blogs();
        moved.name = ObjectName::qualified("archive", "Blogs");
        let target = model(vec![moved]);

        let hints = RenameHints::new().rename_table("Blogs", ObjectName::qualified("archive", "Blogs"));
        let ops = ModelDiffer::new().with_renames(hints).diff(&source, &target).unwrap();
        assert_eq!(kinds(&ops), vec!["MoveTableToSchema Blogs"]);
        assert_eq!(source.apply(&ops).unwrap(), target);
    }

    #[test]
    fn test_column_changes() {
        let source = model(vec![blogs()]);
        let target = model(vec![Table::new("Blogs")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("Url", ColumnType::varchar(500)))
            .column(Column::new("Rating", ColumnType::Int32).default_sql("0"))
            .primary_key("PK_Blogs", ["Id"])]);

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        assert_eq!(kinds(&ops), vec!["AlterColumn Blogs", "AddColumn Blogs"]);
        match &ops[0] {
            MigrationOperation::AlterColumn { column, old_column, .. } => {
                assert_eq!(column.column_type, ColumnType::varchar(500));
                assert_eq!(old_column.column_type, ColumnType::text());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(ops[0].is_destructive());
        assert_eq!(source.apply(&ops).unwrap(), target);
    }

    #[test]
    fn test_default_only_change() {
        let source = model(vec![blogs()]);
        let target = model(vec![Table::new("Blogs")
            .column(Column::new("Id", ColumnType::Int32))
            .column(Column::new("Url", ColumnType::text()).nullable().default_sql("''"))
            .primary_key("PK_Blogs", ["Id"])]);

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        assert_eq!(kinds(&ops), vec!["AddDefaultConstraint Blogs"]);
        let back = ModelDiffer::new().diff(&target, &source).unwrap();
        assert_eq!(kinds(&back), vec!["DropDefaultConstraint Blogs"]);
    }

    #[test]
    fn test_altered_key_column_recreates_dependents() {
        let source = model(vec![blogs(), posts()]);
        let mut wide_blogs = blogs();
        wide_blogs.columns[0].column_type = ColumnType::Int64;
        let mut wide_posts = posts();
        wide_posts.columns[1].column_type = ColumnType::Int64;
        let target = model(vec![wide_blogs, wide_posts]);

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        assert_eq!(
            kinds(&ops),
            vec![
                "DropForeignKey Posts",
                "DropPrimaryKey Blogs",
                "DropIndex Posts",
                "AlterColumn Blogs",
                "AlterColumn Posts",
                "AddPrimaryKey Blogs",
                "AddForeignKey Posts",
                "CreateIndex Posts",
            ]
        );
        assert_eq!(source.apply(&ops).unwrap(), target);
    }

    #[test]
    fn test_index_rename_detected() {
        let source = model(vec![posts()]);
        let mut renamed = posts();
        renamed.indexes[0].name = "IX_Posts_Blog".to_string();
        let target = model(vec![renamed]);

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        assert_eq!(kinds(&ops), vec!["RenameIndex Posts"]);
    }

    #[test]
    fn test_unique_and_sequence_changes() {
        let source = model(vec![blogs()]);
        let target = SchemaModel::builder()
            .table(blogs().unique(UniqueConstraint::new("AK_Blogs_Url", ["Url"])))
            .sequence(Sequence::new("BlogNumbers"))
            .build()
            .unwrap();

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        assert_eq!(
            kinds(&ops),
            vec!["CreateSequence ", "AddUniqueConstraint Blogs"]
        );
        assert_eq!(source.apply(&ops).unwrap(), target);
    }

    #[test]
    fn test_drop_column_ordering() {
        let source = model(vec![posts()]);
        let target = model(vec![Table::new("Posts")
            .column(Column::new("Id", ColumnType::Int32))
            .primary_key("PK_Posts", ["Id"])]);

        let ops = ModelDiffer::new().diff(&source, &target).unwrap();
        assert_eq!(
            kinds(&ops),
            vec!["DropForeignKey Posts", "DropIndex Posts", "DropColumn Posts"]
        );
        assert!(ops[2].is_destructive());
        assert_eq!(source.apply(&ops).unwrap(), target);
    }

    /// Every AddForeignKey comes after the CreateTable of the table it references,
    /// and every DropTable after the DropForeignKey of keys referencing it.
    #[test]
    fn test_ordering_invariant_over_varied_models() {
        let shapes = vec![
            SchemaModel::empty(),
            model(vec![blogs()]),
            model(vec![blogs(), posts()]),
            cycle(true),
            cycle(false),
        ];
        for source in &shapes {
            for target in &shapes {
                let Ok(ops) = ModelDiffer::new().diff(source, target) else {
                    continue;
                };
                for (i, op) in ops.iter().enumerate() {
                    if let MigrationOperation::AddForeignKey { foreign_key, .. } = op {
                        let created_later = ops[i..].iter().any(|later| {
                            matches!(later, MigrationOperation::CreateTable { table } if table.name == foreign_key.referenced_table)
                        });
                        assert!(!created_later);
                    }
                    if let MigrationOperation::DropForeignKey { table, name } = op {
                        let fk = source.table(table).and_then(|t| t.find_foreign_key(name)).unwrap();
                        let dropped_before = ops[..i].iter().any(|earlier| {
                            matches!(earlier, MigrationOperation::DropTable { name } if *name == fk.referenced_table)
                        });
                        assert!(!dropped_before);
                    }
                }
                assert_eq!(&source.apply(&ops).unwrap(), target);
            }
        }
    }
}
