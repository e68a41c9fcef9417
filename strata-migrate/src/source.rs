//! Sources of locally defined migrations.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::migration::Migration;

/// Provides the ordered list of locally defined migrations.
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Load every migration, sorted ordinally by id.
    async fn migrations(&self) -> MigrateResult<Vec<Migration>>;
}

/// Validate ids, reject duplicates and sort ordinally.
pub fn normalize(mut migrations: Vec<Migration>) -> MigrateResult<Vec<Migration>> {
    let mut seen = HashSet::new();
    for migration in &migrations {
        migration.validate()?;
        if !seen.insert(migration.id.as_str()) {
            return Err(MigrationError::invalid_migration(format!(
                "duplicate migration id '{}'",
                migration.id
            )));
        }
    }
    migrations.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(migrations)
}

/// Migrations defined in code.
#[derive(Debug, Clone, Default)]
pub struct StaticMigrationSource {
    migrations: Vec<Migration>,
}

impl StaticMigrationSource {
    /// Create a source over a fixed list.
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Add a migration.
    pub fn with(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }
}

#[async_trait]
impl MigrationSource for StaticMigrationSource {
    async fn migrations(&self) -> MigrateResult<Vec<Migration>> {
        normalize(self.migrations.clone())
    }
}

/// Migrations stored as one JSON artifact per migration in a directory.
///
/// Files are named `<id>.json`; anything else in the directory is ignored.
#[derive(Debug, Clone)]
pub struct DirectoryMigrationSource {
    dir: PathBuf,
}

impl DirectoryMigrationSource {
    /// Create a source over a directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the migrations directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a migration artifact, creating the directory if needed.
    pub async fn write_migration(&self, migration: &Migration) -> MigrateResult<PathBuf> {
        migration.validate()?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(format!("{}.json", migration.id));
        let content = serde_json::to_string_pretty(migration)?;
        tokio::fs::write(&path, content).await?;

        debug!(path = %path.display(), id = %migration.id, "Wrote migration artifact");
        Ok(path)
    }

    async fn read_migration(&self, path: &Path) -> MigrateResult<Migration> {
        let content = tokio::fs::read_to_string(path).await?;
        let migration: Migration = serde_json::from_str(&content)?;

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != migration.id {
            return Err(MigrationError::invalid_migration(format!(
                "file '{}' contains migration '{}'",
                path.display(),
                migration.id
            )));
        }
        Ok(migration)
    }
}

#[async_trait]
impl MigrationSource for DirectoryMigrationSource {
    async fn migrations(&self) -> MigrateResult<Vec<Migration>> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut migrations = Vec::with_capacity(paths.len());
        for path in paths {
            migrations.push(self.read_migration(&path).await?);
        }

        debug!(dir = %self.dir.display(), count = migrations.len(), "Loaded migrations");
        normalize(migrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SchemaModel;
    use crate::operation::MigrationOperation;

    fn migration(id: &str) -> Migration {
        Migration::new(id, SchemaModel::empty())
    }

    #[tokio::test]
    async fn test_static_source_sorts() {
        let source = StaticMigrationSource::default()
            .with(migration("000000000000002_Migration2"))
            .with(migration("000000000000001_Migration1"));
        let ids: Vec<_> = source.migrations().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["000000000000001_Migration1", "000000000000002_Migration2"]);
    }

    #[tokio::test]
    async fn test_static_source_rejects_duplicates() {
        let source = StaticMigrationSource::new(vec![
            migration("000000000000001_Migration1"),
            migration("000000000000001_Migration1"),
        ]);
        assert!(matches!(
            source.migrations().await,
            Err(MigrationError::InvalidMigration(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_source_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryMigrationSource::new(dir.path().join("migrations"));

        assert!(source.migrations().await.unwrap().is_empty());

        let second = migration("20240102000000_Second")
            .with_upgrade(vec![MigrationOperation::sql("SELECT 2")]);
        source.write_migration(&second).await.unwrap();
        source.write_migration(&migration("20240101000000_First")).await.unwrap();
        tokio::fs::write(dir.path().join("migrations").join("README.md"), "notes")
            .await
            .unwrap();

        let loaded = source.migrations().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "20240101000000_First");
        assert_eq!(loaded[1], second);
    }

    #[tokio::test]
    async fn test_directory_source_rejects_mismatched_file() {
        let dir = tempfile::tempdir().unwrap();
        let content = serde_json::to_string(&migration("20240101000000_First")).unwrap();
        tokio::fs::write(dir.path().join("20240101000000_Other.json"), content)
            .await
            .unwrap();

        let source = DirectoryMigrationSource::new(dir.path());
        assert!(source.migrations().await.is_err());
    }
}
