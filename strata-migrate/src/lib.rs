//! # strata-migrate
//!
//! Migration engine for the Strata ORM.
//!
//! This crate provides functionality for:
//! - A dialect-neutral schema model and versioned, reversible migrations
//! - Model diffing with foreign-key aware operation ordering
//! - SQL generation for SQL Server and SQLite (with table rebuilds where
//!   SQLite has no direct `ALTER`)
//! - Migration history tracking in the database
//! - Planning and batch-wise application of upgrades and downgrades
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ Schema Model │────▶│ Model Differ   │────▶│ Migration    │
//! └──────────────┘     └────────────────┘     └──────────────┘
//!                                                    │
//!                                                    ▼
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ History Tbl  │◀───▶│ Migrator       │────▶│ SQL Gen      │
//! └──────────────┘     └────────────────┘     └──────────────┘
//!                              │
//!                              ▼
//!                      ┌────────────────┐
//!                      │ SchemaExecutor │
//!                      └────────────────┘
//! ```
//!
//! The migrator pairs the local migrations with the store's ledger in
//! lockstep. Every upgrade is rendered against the previous migration's
//! snapshot and every downgrade against its own, so intermediate DDL sees the
//! schema as it stood at that point of history. Statements run in
//! serializable batches; a batch that fails is rolled back while earlier
//! batches stay committed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::{DirectoryMigrationSource, ExecutionMode, Migrator, MigratorConfig};
//!
//! async fn update_database(
//!     executor: Arc<dyn strata_migrate::SchemaExecutor>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigratorConfig::load("strata.toml").await?;
//!     let source = Arc::new(DirectoryMigrationSource::new(&config.migrations_dir));
//!     let migrator = Migrator::new(config, source, executor);
//!
//!     let plan = migrator.plan(None).await?;
//!     println!("Plan: {}", plan.summary());
//!
//!     let report = migrator.apply(None, ExecutionMode::Execute).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! Target `"0"` reverts every migration and drops the history table.

pub mod blocking;
pub mod config;
pub mod diff;
pub mod error;
pub mod executor;
pub mod history;
pub mod migration;
pub mod migrator;
pub mod model;
pub mod operation;
pub mod source;
pub mod sql;

// Re-exports
pub use blocking::BlockingMigrator;
pub use config::{HistoryConfig, MigratorConfig};
pub use diff::{ModelDiffer, RenameHints};
pub use error::{MigrateResult, MigrationError, StoreError, StoreErrorKind};
pub use executor::{
    BatchFailure, Existence, IsolationLevel, Row, SchemaExecutor, SqlBatch, partition,
};
pub use history::{HistoryRepository, HistoryRow};
pub use migration::{
    INITIAL_DATABASE, Migration, generate_migration_id, generate_migration_id_at,
    migration_name, validate_migration_id,
};
pub use migrator::{
    ApplyReport, ExecutionMode, MigrationPlan, MigrationStatus, Migrator, PlanStep, ScriptOptions,
    StepKind,
};
pub use model::{
    Column, ColumnType, ForeignKey, Index, ObjectName, PrimaryKey, SchemaModel,
    SchemaModelBuilder, Sequence, Table, UniqueConstraint,
};
pub use operation::MigrationOperation;
pub use source::{DirectoryMigrationSource, MigrationSource, StaticMigrationSource};
pub use sql::{Dialect, MigrationsSqlGenerator, SqlServerGenerator, SqlStatement, SqliteGenerator};
