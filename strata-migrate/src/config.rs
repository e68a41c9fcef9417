//! Migrator configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::sql::Dialect;

/// Default history table name.
pub const DEFAULT_HISTORY_TABLE: &str = "__MigrationHistory";

/// Default context key.
pub const DEFAULT_CONTEXT_KEY: &str = "default";

/// Default migrations directory.
pub const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";

/// History table settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Table name.
    pub table: String,
    /// Table schema.
    pub schema: Option<String>,
    /// Owning context discriminator written to every row.
    pub context_key: String,
    /// Product version written to every row.
    pub product_version: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_HISTORY_TABLE.to_string(),
            schema: None,
            context_key: DEFAULT_CONTEXT_KEY.to_string(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Migrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// History table settings.
    pub history: HistoryConfig,
    /// Directory holding migration artifacts.
    pub migrations_dir: PathBuf,
    /// SQL dialect for offline script generation.
    pub dialect: Dialect,
    /// Allow scaffolding migrations that drop data.
    pub allow_data_loss: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            dialect: Dialect::default(),
            allow_data_loss: false,
        }
    }
}

impl MigratorConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> MigrateResult<Self> {
        toml::from_str(content).map_err(|e| MigrationError::config(e.to_string()))
    }

    /// Render as a TOML document.
    pub fn to_toml(&self) -> MigrateResult<String> {
        toml::to_string_pretty(self).map_err(|e| MigrationError::config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml(&content)
    }

    /// Save configuration to a TOML file.
    pub async fn save(&self, path: impl AsRef<Path>) -> MigrateResult<()> {
        tokio::fs::write(path.as_ref(), self.to_toml()?).await?;
        Ok(())
    }

    /// Set the history table name.
    pub fn history_table(mut self, table: impl Into<String>) -> Self {
        self.history.table = table.into();
        self
    }

    /// Set the history table schema.
    pub fn history_schema(mut self, schema: impl Into<String>) -> Self {
        self.history.schema = Some(schema.into());
        self
    }

    /// Set the context key.
    pub fn context_key(mut self, key: impl Into<String>) -> Self {
        self.history.context_key = key.into();
        self
    }

    /// Set the product version.
    pub fn product_version(mut self, version: impl Into<String>) -> Self {
        self.history.product_version = version.into();
        self
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the dialect.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Allow scaffolding destructive migrations.
    pub fn allow_data_loss(mut self, allow: bool) -> Self {
        self.allow_data_loss = allow;
        self
    }

    /// Check the configuration for values the store cannot accept.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.history.table.trim().is_empty() {
            return Err(MigrationError::config("history table name must not be empty"));
        }
        if self.history.context_key.is_empty() {
            return Err(MigrationError::config("context key must not be empty"));
        }
        if self.history.context_key.chars().count() > 300 {
            return Err(MigrationError::config("context key must be at most 300 characters"));
        }
        if self.history.product_version.chars().count() > 32 {
            return Err(MigrationError::config("product version must be at most 32 characters"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MigratorConfig::default();
        assert_eq!(config.history.table, "__MigrationHistory");
        assert_eq!(config.history.context_key, "default");
        assert_eq!(config.history.schema, None);
        assert_eq!(config.dialect, Dialect::SqlServer);
        assert!(!config.allow_data_loss);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = MigratorConfig::from_toml(
            r#"
            dialect = "sqlite"
            migrations_dir = "db/migrations"

            [history]
            table = "__EFMigrationsHistory"
            context_key = "Blogging"
            "#,
        )
        .unwrap();
        assert_eq!(config.dialect, Dialect::Sqlite);
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.history.table, "__EFMigrationsHistory");
        assert_eq!(config.history.context_key, "Blogging");
        assert_eq!(config.history.product_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            MigratorConfig::from_toml("dialect = \"oracle\""),
            Err(MigrationError::Config(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(MigratorConfig::new().history_table(" ").validate().is_err());
        assert!(MigratorConfig::new().context_key("").validate().is_err());
        assert!(MigratorConfig::new().product_version("x".repeat(33)).validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        let config = MigratorConfig::new()
            .history_schema("ops")
            .context_key("Shop")
            .allow_data_loss(true);
        config.save(&path).await.unwrap();

        let loaded = MigratorConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}
