//! The migration orchestrator.
//!
//! A [`Migrator`] pairs the local migration timeline with the store's history
//! ledger, plans the upgrade or downgrade steps towards a target and executes
//! them batch by batch.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MigratorConfig;
use crate::diff::ModelDiffer;
use crate::error::{MigrateResult, MigrationError};
use crate::executor::{IsolationLevel, SchemaExecutor, partition};
use crate::history::{HistoryRepository, HistoryRow};
use crate::migration::{INITIAL_DATABASE, Migration, generate_migration_id};
use crate::model::SchemaModel;
use crate::source::MigrationSource;
use crate::sql::{Dialect, SqlStatement};

/// Whether `apply` touches the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Plan and render only.
    Simulate,
    /// Plan, render and execute.
    #[default]
    Execute,
}

/// What a plan step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Create the history table.
    CreateHistory,
    /// Apply a migration's upgrade operations and record it.
    Upgrade {
        /// Migration id.
        migration_id: String,
    },
    /// Apply a migration's downgrade operations and remove its record.
    Downgrade {
        /// Migration id.
        migration_id: String,
    },
    /// Drop the history table.
    DropHistory,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateHistory => f.write_str("create history table"),
            Self::Upgrade { migration_id } => write!(f, "apply {}", migration_id),
            Self::Downgrade { migration_id } => write!(f, "revert {}", migration_id),
            Self::DropHistory => f.write_str("drop history table"),
        }
    }
}

/// One step of a plan and its rendered statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// What the step does.
    pub kind: StepKind,
    /// Statements in execution order.
    pub statements: Vec<SqlStatement>,
}

/// Ordered steps moving the store to a target migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
}

impl MigrationPlan {
    /// Check if there's anything to do.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All statements in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &SqlStatement> {
        self.steps.iter().flat_map(|s| s.statements.iter())
    }

    /// Ids of migrations the plan applies.
    pub fn upgrades(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match &s.kind {
                StepKind::Upgrade { migration_id } => Some(migration_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Ids of migrations the plan reverts.
    pub fn downgrades(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match &s.kind {
                StepKind::Downgrade { migration_id } => Some(migration_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Render the plan as one script.
    pub fn to_script(&self) -> String {
        let mut script = String::new();
        for step in &self.steps {
            script.push_str(&format!("-- {}\n", step.kind));
            for statement in &step.statements {
                script.push_str(&statement.sql);
                script.push_str("\n\n");
            }
        }
        script
    }

    /// Get a summary of the plan.
    pub fn summary(&self) -> String {
        let upgrades = self.upgrades().len();
        let downgrades = self.downgrades().len();
        match (upgrades, downgrades) {
            (0, 0) if self.is_empty() => "No migrations to apply".to_string(),
            (0, 0) => format!("{} maintenance steps", self.steps.len()),
            (u, 0) => format!("{} migrations to apply", u),
            (0, d) => format!("{} migrations to revert", d),
            (u, d) => format!("{} migrations to revert, {} to apply", d, u),
        }
    }
}

/// Result of an `apply` call.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// Execution mode used.
    pub mode: ExecutionMode,
    /// The plan that was executed or simulated.
    pub plan: MigrationPlan,
    /// Ids of applied migrations.
    pub applied: Vec<String>,
    /// Ids of reverted migrations.
    pub reverted: Vec<String>,
    /// Number of committed batches.
    pub batches: usize,
    /// Rows affected across all batches.
    pub rows_affected: u64,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl ApplyReport {
    /// Check if any migrations were applied or reverted.
    pub fn has_changes(&self) -> bool {
        !self.applied.is_empty() || !self.reverted.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        if self.mode == ExecutionMode::Simulate {
            return format!("Simulated: {}", self.plan.summary());
        }
        let mut parts = Vec::new();
        if !self.reverted.is_empty() {
            parts.push(format!("{} reverted", self.reverted.len()));
        }
        if !self.applied.is_empty() {
            parts.push(format!("{} applied", self.applied.len()));
        }
        if parts.is_empty() {
            "No migrations applied".to_string()
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        }
    }
}

/// How [`Migrator::script_with_options`] frames the rendered statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptOptions {
    /// Guard every step on the history ledger so the script can run against
    /// a database at any point of the timeline.
    pub idempotent: bool,
    /// Wrap each step in its own transaction.
    pub transactions: bool,
}

impl ScriptOptions {
    /// Create default options: unguarded and without transaction framing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether steps are guarded on the ledger.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Set whether each step runs in its own transaction.
    pub fn transactions(mut self, transactions: bool) -> Self {
        self.transactions = transactions;
        self
    }
}

/// Status of one local migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration id.
    pub id: String,
    /// Whether the ledger records it as applied.
    pub applied: bool,
}

/// What the store's ledger says.
struct Ledger {
    history_exists: bool,
    applied: Vec<HistoryRow>,
}

/// A resolved target: how many local migrations should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    count: usize,
    initial: bool,
}

/// Plans and applies migrations against one store.
pub struct Migrator {
    config: MigratorConfig,
    source: Arc<dyn MigrationSource>,
    executor: Option<Arc<dyn SchemaExecutor>>,
    dialect: Dialect,
    history: HistoryRepository,
    differ: ModelDiffer,
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("dialect", &self.dialect)
            .field("connected", &self.executor.is_some())
            .finish()
    }
}

impl Migrator {
    /// Create a migrator bound to a store.
    pub fn new(
        config: MigratorConfig,
        source: Arc<dyn MigrationSource>,
        executor: Arc<dyn SchemaExecutor>,
    ) -> Self {
        let dialect = executor.dialect();
        let history = HistoryRepository::new(config.history.clone(), dialect);
        Self {
            config,
            source,
            executor: Some(executor),
            dialect,
            history,
            differ: ModelDiffer::new(),
        }
    }

    /// Create a migrator for script generation only, using the configured dialect.
    pub fn offline(config: MigratorConfig, source: Arc<dyn MigrationSource>) -> Self {
        let dialect = config.dialect;
        let history = HistoryRepository::new(config.history.clone(), dialect);
        Self {
            config,
            source,
            executor: None,
            dialect,
            history,
            differ: ModelDiffer::new(),
        }
    }

    /// Use a differ with rename hints for scaffolding.
    pub fn with_differ(mut self, differ: ModelDiffer) -> Self {
        self.differ = differ;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Get the dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Get the history repository.
    pub fn history(&self) -> &HistoryRepository {
        &self.history
    }

    fn executor(&self) -> MigrateResult<&dyn SchemaExecutor> {
        self.executor
            .as_deref()
            .ok_or_else(|| MigrationError::config("this migrator has no store attached"))
    }

    /// Local migrations, ordered ordinally by id.
    pub async fn local_migrations(&self) -> MigrateResult<Vec<Migration>> {
        self.source.migrations().await
    }

    /// Applied migrations recorded in the store for this context.
    ///
    /// A missing database or history table yields an empty list.
    pub async fn applied_migrations(&self) -> MigrateResult<Vec<HistoryRow>> {
        Ok(self.load_ledger(self.executor()?).await?.applied)
    }

    /// Local migrations the store has not applied.
    pub async fn pending_migrations(&self) -> MigrateResult<Vec<Migration>> {
        let mut local = self.local_migrations().await?;
        let ledger = self.load_ledger(self.executor()?).await?;
        let applied = pair(&local, &ledger.applied)?;
        Ok(local.split_off(applied))
    }

    /// Applied state of every local migration.
    pub async fn status(&self) -> MigrateResult<Vec<MigrationStatus>> {
        let local = self.local_migrations().await?;
        let ledger = self.load_ledger(self.executor()?).await?;
        let applied = pair(&local, &ledger.applied)?;
        Ok(local
            .into_iter()
            .enumerate()
            .map(|(i, m)| MigrationStatus {
                id: m.id,
                applied: i < applied,
            })
            .collect())
    }

    /// Plan the steps moving the store to `target`.
    ///
    /// `None` targets the latest local migration and `Some("0")` the initial
    /// database. Nothing is executed.
    pub async fn plan(&self, target: Option<&str>) -> MigrateResult<MigrationPlan> {
        let local = self.local_migrations().await?;
        let target = resolve_target(&local, target)?;
        let executor = self.executor()?;
        let ledger = self.load_ledger(executor).await?;
        let applied = pair(&local, &ledger.applied)?;
        let teardown = self
            .teardown(Some(executor), target, ledger.history_exists)
            .await?;
        self.build_plan(&local, applied, target, ledger.history_exists, teardown)
    }

    /// Move the store to `target`.
    pub async fn apply(&self, target: Option<&str>, mode: ExecutionMode) -> MigrateResult<ApplyReport> {
        self.apply_with_cancellation(target, mode, &CancellationToken::new())
            .await
    }

    /// Move the store to `target`, checking `cancel` between batches.
    ///
    /// Batches committed before a failure or cancellation stay committed; the
    /// next call recomputes the plan from the ledger as it then stands.
    pub async fn apply_with_cancellation(
        &self,
        target: Option<&str>,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> MigrateResult<ApplyReport> {
        let start = Instant::now();
        let executor = self.executor()?;
        let local = self.local_migrations().await?;
        let target = resolve_target(&local, target)?;

        if mode == ExecutionMode::Execute && !executor.database_exists().await?.exists() {
            info!(dialect = %self.dialect, "Creating database");
            executor.create_database().await?;
        }

        let ledger = self.load_ledger(executor).await?;
        let applied_count = pair(&local, &ledger.applied)?;
        let teardown = self
            .teardown(Some(executor), target, ledger.history_exists)
            .await?;
        let plan = self.build_plan(&local, applied_count, target, ledger.history_exists, teardown)?;

        let mut report = ApplyReport {
            mode,
            plan: MigrationPlan::default(),
            applied: Vec::new(),
            reverted: Vec::new(),
            batches: 0,
            rows_affected: 0,
            duration_ms: 0,
        };

        if mode == ExecutionMode::Execute {
            self.execute(executor, &plan, cancel, &mut report).await?;
        } else {
            debug!(steps = plan.steps.len(), "Simulated migration plan");
        }

        report.plan = plan;
        report.duration_ms = start.elapsed().as_millis() as i64;
        info!(summary = %report.summary(), "Migration finished");
        Ok(report)
    }

    async fn execute(
        &self,
        executor: &dyn SchemaExecutor,
        plan: &MigrationPlan,
        cancel: &CancellationToken,
        report: &mut ApplyReport,
    ) -> MigrateResult<()> {
        for step in &plan.steps {
            match &step.kind {
                StepKind::CreateHistory => {
                    info!(table = %self.history.table_name(), "Creating migration history table")
                }
                StepKind::Upgrade { migration_id } => {
                    info!(migration = %migration_id, "Applying migration")
                }
                StepKind::Downgrade { migration_id } => {
                    info!(migration = %migration_id, "Reverting migration")
                }
                StepKind::DropHistory => {
                    info!(table = %self.history.table_name(), "Dropping migration history table")
                }
            }

            for batch in partition(step.statements.clone(), IsolationLevel::Serializable) {
                if cancel.is_cancelled() {
                    warn!(completed_batches = report.batches, "Migration cancelled");
                    return Err(MigrationError::Cancelled {
                        completed_batches: report.batches,
                    });
                }

                let batch_index = report.batches;
                debug!(
                    batch = batch_index,
                    statements = batch.statements.len(),
                    transactional = batch.is_transactional(),
                    "Executing batch"
                );
                let rows = executor.execute_batch(&batch).await.map_err(|failure| {
                    let statement = batch
                        .statements
                        .get(failure.statement_index)
                        .map(|s| s.sql.clone())
                        .unwrap_or_default();
                    MigrationError::StoreExecution {
                        batch_index,
                        statement,
                        source: failure.error,
                    }
                })?;
                report.batches += 1;
                report.rows_affected += rows;
            }

            match &step.kind {
                StepKind::Upgrade { migration_id } => report.applied.push(migration_id.clone()),
                StepKind::Downgrade { migration_id } => report.reverted.push(migration_id.clone()),
                StepKind::CreateHistory | StepKind::DropHistory => {}
            }
        }
        Ok(())
    }

    /// Render the statements between two points of the local timeline.
    ///
    /// `from` defaults to the initial database and `to` to the latest
    /// migration. No store is touched.
    pub async fn script(&self, from: Option<&str>, to: Option<&str>) -> MigrateResult<Vec<SqlStatement>> {
        self.script_with_options(from, to, ScriptOptions::default())
            .await
    }

    /// Render a script between two points of the local timeline.
    ///
    /// An idempotent script guards each step on the history ledger and needs
    /// a dialect with conditional statements; SQLite reports
    /// [`MigrationError::DialectUnsupportedOperation`].
    pub async fn script_with_options(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        options: ScriptOptions,
    ) -> MigrateResult<Vec<SqlStatement>> {
        if options.idempotent && !self.history.supports_guards() {
            return Err(MigrationError::unsupported(self.dialect.name(), "IdempotentScript"));
        }

        let local = self.local_migrations().await?;
        let from = match from {
            Some(from) => resolve_target(&local, Some(from))?.count,
            None => 0,
        };
        let to = resolve_target(&local, to)?;
        let teardown = self.teardown(None, to, from > 0).await?;
        let plan = self.build_plan(&local, from, to, from > 0, teardown)?;

        let mut script = Vec::new();
        for step in plan.steps {
            let statements = if options.idempotent {
                self.guard_step(&step)?
            } else {
                step.statements
            };
            if options.transactions {
                frame_in_transaction(statements, &mut script);
            } else {
                script.extend(statements);
            }
        }
        Ok(script)
    }

    fn guard_step(&self, step: &PlanStep) -> MigrateResult<Vec<SqlStatement>> {
        let condition = match &step.kind {
            StepKind::CreateHistory => self.history.missing_table_condition(),
            StepKind::Upgrade { migration_id } => self.history.unapplied_condition(migration_id),
            StepKind::Downgrade { migration_id } => self.history.applied_condition(migration_id),
            StepKind::DropHistory => self.history.existing_table_condition(),
        };
        step.statements
            .iter()
            .map(|statement| self.history.guard(&condition, statement))
            .collect()
    }

    /// Statements dropping the shared history table when moving to the
    /// initial database, or `None` when the table must stay.
    ///
    /// Other contexts may keep rows in the same table. With a store attached
    /// they are counted up front; scripts rely on a guarded drop, and dialects
    /// that cannot guard keep the table.
    async fn teardown(
        &self,
        executor: Option<&dyn SchemaExecutor>,
        target: Target,
        history_exists: bool,
    ) -> MigrateResult<Option<Vec<SqlStatement>>> {
        if !(target.initial && history_exists) {
            return Ok(None);
        }

        if let Some(executor) = executor {
            if self.history.has_other_contexts(executor).await? {
                info!(
                    table = %self.history.table_name(),
                    "Keeping migration history table used by other contexts"
                );
                return Ok(None);
            }
        }

        match self.history.generate_guarded_drop_sql()? {
            Some(guarded) => Ok(Some(guarded)),
            None if executor.is_some() => Ok(Some(self.history.generate_drop_sql()?)),
            None => {
                warn!(
                    table = %self.history.table_name(),
                    dialect = %self.dialect,
                    "Script keeps the migration history table; drop it once no context uses it"
                );
                Ok(None)
            }
        }
    }

    /// Check whether `current` differs from the last local snapshot.
    pub async fn has_pending_model_changes(&self, current: &SchemaModel) -> MigrateResult<bool> {
        let local = self.local_migrations().await?;
        let previous = local
            .last()
            .map_or_else(SchemaModel::empty, |m| m.target_model.clone());
        self.differ.has_differences(&previous, current)
    }

    /// Build a new migration moving the last local snapshot to `current`.
    ///
    /// The migration is not persisted; see
    /// [`DirectoryMigrationSource::write_migration`](crate::source::DirectoryMigrationSource::write_migration).
    pub async fn scaffold(&self, name: &str, current: &SchemaModel) -> MigrateResult<Migration> {
        let local = self.local_migrations().await?;
        let previous = local
            .last()
            .map_or_else(SchemaModel::empty, |m| m.target_model.clone());

        let id = generate_migration_id(name);
        if let Some(last) = local.last() {
            if id <= last.id {
                return Err(MigrationError::invalid_migration(format!(
                    "new migration '{}' would sort before existing migration '{}'",
                    id, last.id
                )));
            }
        }

        let migration = Migration::scaffold(id, &previous, current, &self.differ)?;
        if migration.upgrade_operations.is_empty() {
            return Err(MigrationError::NoChanges);
        }

        let destructive: Vec<&str> = migration
            .upgrade_operations
            .iter()
            .filter(|op| op.is_destructive())
            .map(|op| op.kind())
            .collect();
        if !destructive.is_empty() && !self.config.allow_data_loss {
            return Err(MigrationError::data_loss(format!(
                "migration '{}' contains {}. Set allow_data_loss=true to proceed.",
                migration.id,
                destructive.join(", ")
            )));
        }

        info!(migration = %migration.id, operations = migration.upgrade_operations.len(), "Scaffolded migration");
        Ok(migration)
    }

    async fn load_ledger(&self, executor: &dyn SchemaExecutor) -> MigrateResult<Ledger> {
        if !executor.database_exists().await?.exists() {
            return Ok(Ledger {
                history_exists: false,
                applied: Vec::new(),
            });
        }
        match self.history.get_applied_migrations(executor).await {
            Ok(applied) => Ok(Ledger {
                history_exists: true,
                applied,
            }),
            Err(MigrationError::HistoryTableMissing) => Ok(Ledger {
                history_exists: false,
                applied: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }

    fn build_plan(
        &self,
        local: &[Migration],
        applied: usize,
        target: Target,
        history_exists: bool,
        teardown: Option<Vec<SqlStatement>>,
    ) -> MigrateResult<MigrationPlan> {
        let generator = self.dialect.generator();
        let mut steps = Vec::new();

        // Most recently applied first; each is rendered against its own snapshot.
        for migration in local[target.count.min(applied)..applied].iter().rev() {
            let mut statements =
                generator.generate(&migration.downgrade_operations, &migration.target_model)?;
            statements.push(self.history.generate_delete_sql(&migration.id));
            steps.push(PlanStep {
                kind: StepKind::Downgrade {
                    migration_id: migration.id.clone(),
                },
                statements,
            });
        }

        if target.count > applied {
            if !history_exists {
                steps.push(PlanStep {
                    kind: StepKind::CreateHistory,
                    statements: self.history.generate_create_sql()?,
                });
            }

            let empty = SchemaModel::empty();
            for index in applied..target.count {
                let migration = &local[index];
                let source = match index {
                    0 => &empty,
                    _ => &local[index - 1].target_model,
                };
                let mut statements = generator.generate(&migration.upgrade_operations, source)?;
                statements.push(self.history.generate_insert_sql(&migration.id));
                steps.push(PlanStep {
                    kind: StepKind::Upgrade {
                        migration_id: migration.id.clone(),
                    },
                    statements,
                });
            }
        }

        if let Some(statements) = teardown {
            steps.push(PlanStep {
                kind: StepKind::DropHistory,
                statements,
            });
        }

        Ok(MigrationPlan { steps })
    }
}

/// Resolve a target against the local timeline without touching the store.
fn resolve_target(local: &[Migration], target: Option<&str>) -> MigrateResult<Target> {
    match target {
        None => Ok(Target {
            count: local.len(),
            initial: false,
        }),
        Some(INITIAL_DATABASE) => Ok(Target {
            count: 0,
            initial: true,
        }),
        Some(target) => local
            .iter()
            .position(|m| m.id == target)
            .or_else(|| local.iter().position(|m| m.matches(target)))
            .map(|index| Target {
                count: index + 1,
                initial: false,
            })
            .ok_or_else(|| MigrationError::TargetMigrationNotFound(target.to_string())),
    }
}

/// Append `statements` to `script`, one transaction per run of statements
/// that may share one.
fn frame_in_transaction(statements: Vec<SqlStatement>, script: &mut Vec<SqlStatement>) {
    let mut open = false;
    for statement in statements {
        if statement.suppress_transaction {
            if open {
                script.push(SqlStatement::new("COMMIT;"));
                open = false;
            }
        } else if !open {
            script.push(SqlStatement::new("BEGIN TRANSACTION;"));
            open = true;
        }
        script.push(statement);
    }
    if open {
        script.push(SqlStatement::new("COMMIT;"));
    }
}

/// Walk the ledger and the local timeline in lockstep.
///
/// Returns the number of applied migrations; the ledger must be a prefix of
/// the local timeline.
fn pair(local: &[Migration], applied: &[HistoryRow]) -> MigrateResult<usize> {
    for (index, row) in applied.iter().enumerate() {
        match local.get(index) {
            Some(migration) if migration.id == row.migration_id => {}
            _ => return Err(MigrationError::diverged(row.migration_id.clone())),
        }
    }
    Ok(applied.len())
}
