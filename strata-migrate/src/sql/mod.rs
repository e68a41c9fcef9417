//! SQL generation for migrations.
//!
//! Each [`Dialect`] has a [`MigrationsSqlGenerator`] that renders operations
//! against the schema as it stands at that point of the plan.

mod sqlite;
mod sqlserver;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use sqlite::SqliteGenerator;
pub use sqlserver::SqlServerGenerator;

use crate::error::{MigrateResult, MigrationError};
use crate::model::{ObjectName, SchemaModel};
use crate::operation::MigrationOperation;

/// One rendered statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlStatement {
    /// Statement text.
    pub sql: String,
    /// The statement must run outside a transaction.
    #[serde(default)]
    pub suppress_transaction: bool,
}

impl SqlStatement {
    /// A statement that runs inside a transaction.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            suppress_transaction: false,
        }
    }

    /// A statement that must run on its own, outside any transaction.
    pub fn without_transaction(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            suppress_transaction: true,
        }
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Renders migration operations for one backend.
pub trait MigrationsSqlGenerator: Send + Sync {
    /// Dialect name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Quote an identifier.
    fn quote_identifier(&self, name: &str) -> String;

    /// Quote a possibly schema-qualified table name.
    fn quote_table(&self, name: &ObjectName) -> String;

    /// Render a string literal.
    fn string_literal(&self, value: &str) -> String;

    /// Render `operations` in order, starting from `source`.
    fn generate(
        &self,
        operations: &[MigrationOperation],
        source: &SchemaModel,
    ) -> MigrateResult<Vec<SqlStatement>>;

    /// Quote and join a column list.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Microsoft SQL Server.
    #[default]
    SqlServer,
    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// The generator for this dialect.
    pub fn generator(self) -> &'static dyn MigrationsSqlGenerator {
        match self {
            Self::SqlServer => &SqlServerGenerator,
            Self::Sqlite => &SqliteGenerator,
        }
    }

    /// Dialect name.
    pub fn name(self) -> &'static str {
        self.generator().name()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(MigrationError::config(format!("unknown dialect '{}'", other))),
        }
    }
}

/// Escape `quote` inside `value` by doubling it.
pub(crate) fn escape(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        if ch == quote {
            out.push(ch);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_parse() {
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("MSSQL".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_dialect_generator() {
        assert_eq!(Dialect::SqlServer.name(), "SqlServer");
        assert_eq!(Dialect::Sqlite.to_string(), "Sqlite");
    }

    #[test]
    fn test_quoting() {
        let mssql = Dialect::SqlServer.generator();
        assert_eq!(mssql.quote_identifier("a]b"), "[a]]b]");
        assert_eq!(mssql.string_literal("it's"), "N'it''s'");
        assert_eq!(
            mssql.quote_table(&ObjectName::qualified("dbo", "T")),
            "[dbo].[T]"
        );

        let sqlite = Dialect::Sqlite.generator();
        assert_eq!(sqlite.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(sqlite.string_literal("it's"), "'it''s'");
        assert_eq!(
            sqlite.quote_table(&ObjectName::qualified("dbo", "T")),
            "\"T\""
        );
        assert_eq!(sqlite.column_list(&["A".into(), "B".into()]), "\"A\", \"B\"");
    }

    #[test]
    fn test_statement_flags() {
        assert!(!SqlStatement::new("SELECT 1").suppress_transaction);
        assert!(SqlStatement::without_transaction("CREATE DATABASE [x]").suppress_transaction);
    }
}
