//! Synchronous facade over [`Migrator`].

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use crate::error::MigrateResult;
use crate::history::HistoryRow;
use crate::migration::Migration;
use crate::migrator::{
    ApplyReport, ExecutionMode, MigrationPlan, MigrationStatus, Migrator, ScriptOptions,
};
use crate::sql::SqlStatement;

/// Drives a [`Migrator`] on a private current-thread runtime.
///
/// Must not be used from inside an async context.
#[derive(Debug)]
pub struct BlockingMigrator {
    inner: Migrator,
    runtime: Runtime,
}

impl BlockingMigrator {
    /// Wrap a migrator.
    pub fn new(inner: Migrator) -> MigrateResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { inner, runtime })
    }

    /// Get the wrapped migrator.
    pub fn inner(&self) -> &Migrator {
        &self.inner
    }

    /// See [`Migrator::plan`].
    pub fn plan(&self, target: Option<&str>) -> MigrateResult<MigrationPlan> {
        self.runtime.block_on(self.inner.plan(target))
    }

    /// See [`Migrator::apply`].
    pub fn apply(&self, target: Option<&str>, mode: ExecutionMode) -> MigrateResult<ApplyReport> {
        self.runtime.block_on(self.inner.apply(target, mode))
    }

    /// See [`Migrator::apply_with_cancellation`].
    pub fn apply_with_cancellation(
        &self,
        target: Option<&str>,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> MigrateResult<ApplyReport> {
        self.runtime
            .block_on(self.inner.apply_with_cancellation(target, mode, cancel))
    }

    /// See [`Migrator::script`].
    pub fn script(&self, from: Option<&str>, to: Option<&str>) -> MigrateResult<Vec<SqlStatement>> {
        self.runtime.block_on(self.inner.script(from, to))
    }

    /// See [`Migrator::script_with_options`].
    pub fn script_with_options(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        options: ScriptOptions,
    ) -> MigrateResult<Vec<SqlStatement>> {
        self.runtime
            .block_on(self.inner.script_with_options(from, to, options))
    }

    /// See [`Migrator::applied_migrations`].
    pub fn applied_migrations(&self) -> MigrateResult<Vec<HistoryRow>> {
        self.runtime.block_on(self.inner.applied_migrations())
    }

    /// See [`Migrator::pending_migrations`].
    pub fn pending_migrations(&self) -> MigrateResult<Vec<Migration>> {
        self.runtime.block_on(self.inner.pending_migrations())
    }

    /// See [`Migrator::status`].
    pub fn status(&self) -> MigrateResult<Vec<MigrationStatus>> {
        self.runtime.block_on(self.inner.status())
    }
}
