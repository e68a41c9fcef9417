//! # Strata
//!
//! Schema migrations for the Strata ORM.
//!
//! Strata provides:
//! - A dialect-neutral schema model and reversible, versioned migrations
//! - A model differ that orders operations around foreign keys
//! - SQL generation for SQL Server and SQLite
//! - A migrator that tracks applied migrations in a history table
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_orm::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigratorConfig::new().dialect(Dialect::Sqlite);
//!     let source = Arc::new(DirectoryMigrationSource::new(&config.migrations_dir));
//!     let executor = Arc::new(strata_orm::sqlite::SqliteExecutor::open("./app.db").await?);
//!
//!     let migrator = Migrator::new(config, source, executor);
//!     let report = migrator.apply(None, ExecutionMode::Execute).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The migration engine.
pub mod migrate {
    pub use strata_migrate::*;
}

/// SQLite schema executor.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use strata_sqlite::*;
}

/// SQL Server schema executor.
#[cfg(feature = "mssql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mssql")))]
pub mod mssql {
    pub use strata_mssql::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        Column, ColumnType, DirectoryMigrationSource, Dialect, ExecutionMode, ForeignKey, Index,
        Migration, MigrationOperation, MigrationSource, Migrator, MigratorConfig, ModelDiffer,
        SchemaExecutor, SchemaModel, StaticMigrationSource, Table,
    };
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationError};
