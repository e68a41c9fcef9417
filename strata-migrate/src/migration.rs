//! Versioned migration artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::ModelDiffer;
use crate::error::{MigrateResult, MigrationError};
use crate::model::SchemaModel;
use crate::operation::MigrationOperation;

/// Target identifier meaning "no migrations applied".
pub const INITIAL_DATABASE: &str = "0";

/// Minimum number of leading digits in a migration id.
const ID_TIMESTAMP_DIGITS: usize = 14;

/// One reversible schema evolution step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Timestamp-prefixed identifier, e.g. `20240101120000_AddBlogs`.
    pub id: String,
    /// Schema after this migration's upgrade operations.
    pub target_model: SchemaModel,
    /// Operations moving from the previous snapshot to `target_model`.
    #[serde(default)]
    pub upgrade_operations: Vec<MigrationOperation>,
    /// Operations moving from `target_model` back to the previous snapshot.
    #[serde(default)]
    pub downgrade_operations: Vec<MigrationOperation>,
}

impl Migration {
    /// Create a migration with no operations.
    pub fn new(id: impl Into<String>, target_model: SchemaModel) -> Self {
        Self {
            id: id.into(),
            target_model,
            upgrade_operations: Vec::new(),
            downgrade_operations: Vec::new(),
        }
    }

    /// Set the upgrade operations.
    pub fn with_upgrade(mut self, operations: Vec<MigrationOperation>) -> Self {
        self.upgrade_operations = operations;
        self
    }

    /// Set the downgrade operations.
    pub fn with_downgrade(mut self, operations: Vec<MigrationOperation>) -> Self {
        self.downgrade_operations = operations;
        self
    }

    /// Human name: the part of the id after the first `_`.
    pub fn name(&self) -> &str {
        migration_name(&self.id)
    }

    /// Check whether `target` names this migration by id or by name.
    pub fn matches(&self, target: &str) -> bool {
        self.id == target || self.name() == target
    }

    /// Check that the id is well formed.
    pub fn validate(&self) -> MigrateResult<()> {
        validate_migration_id(&self.id)
    }

    /// Build a migration by diffing `previous` against `current` in both directions.
    pub fn scaffold(
        id: impl Into<String>,
        previous: &SchemaModel,
        current: &SchemaModel,
        differ: &ModelDiffer,
    ) -> MigrateResult<Self> {
        let migration = Self {
            id: id.into(),
            target_model: current.clone(),
            upgrade_operations: differ.diff(previous, current)?,
            downgrade_operations: differ.inverse().diff(current, previous)?,
        };
        migration.validate()?;
        Ok(migration)
    }
}

/// The part of a migration id after the first `_`, or the whole id.
pub fn migration_name(id: &str) -> &str {
    id.split_once('_').map_or(id, |(_, name)| name)
}

/// Check that an id has a timestamp prefix, an underscore and a name.
pub fn validate_migration_id(id: &str) -> MigrateResult<()> {
    let Some((prefix, name)) = id.split_once('_') else {
        return Err(MigrationError::invalid_migration(format!(
            "migration id '{}' must have the form <timestamp>_<name>",
            id
        )));
    };
    if prefix.len() < ID_TIMESTAMP_DIGITS || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MigrationError::invalid_migration(format!(
            "migration id '{}' must start with at least {} digits",
            id, ID_TIMESTAMP_DIGITS
        )));
    }
    if name.is_empty() {
        return Err(MigrationError::invalid_migration(format!(
            "migration id '{}' has an empty name",
            id
        )));
    }
    Ok(())
}

/// Generate a `%Y%m%d%H%M%S_name` id for the current time.
pub fn generate_migration_id(name: &str) -> String {
    generate_migration_id_at(name, Utc::now())
}

/// Generate a `%Y%m%d%H%M%S_name` id for a given time.
pub fn generate_migration_id_at(name: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", at.format("%Y%m%d%H%M%S"), name)
}
