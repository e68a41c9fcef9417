//! SQLite schema executor for the Strata migration engine.
//!
//! [`SqliteExecutor`] runs migration batches over a single `tokio-rusqlite`
//! connection to a file-based or in-memory database.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::{ExecutionMode, Migrator, MigratorConfig, StaticMigrationSource};
//! use strata_sqlite::SqliteExecutor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Arc::new(SqliteExecutor::open("./app.db").await?);
//!     let source = Arc::new(StaticMigrationSource::new(my_migrations()));
//!     let migrator = Migrator::new(MigratorConfig::new(), source, executor);
//!     migrator.apply(None, ExecutionMode::Execute).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod executor;

pub use error::{SqliteError, SqliteResult, classify};
pub use executor::SqliteExecutor;
