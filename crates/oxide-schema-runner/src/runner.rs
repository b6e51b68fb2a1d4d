//! The schema change runner.
//!
//! This module applies and rolls back migrations and seeders. Each change
//! runs in its own transaction together with its ledger update, so a change
//! is either applied and recorded, or neither.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::change::{ChangeKind, ChangeRecord};
use crate::config::RunnerConfig;
use crate::dialect::TrackingDialect;
use crate::discovery::ChangeDiscovery;
use crate::error::{
    ChangeError, ExecutionError, ExecutionPhase, RegistrationError, Result, RunnerError,
};
use crate::ledger::AppliedChangeLedger;
use crate::registry::ChangeRegistry;
use crate::sorter::{names_match, resolve_name, DependencyGraphSorter};

/// Callback invoked when a change fails to apply or roll back.
pub type ExecutionErrorCallback =
    Box<dyn Fn(&ExecutionError, &ChangeRecord, &SchemaChangeRunner) + Send + Sync>;

/// Callback invoked when discovery cannot turn a file into a change.
pub type RegistrationErrorCallback = Box<dyn Fn(&RegistrationError) + Send + Sync>;

/// Status of a single change, as reported by [`SchemaChangeRunner::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeStatus {
    /// Change name.
    pub name: String,
    /// Change kind.
    pub kind: ChangeKind,
    /// Whether the ledger records the change.
    pub applied: bool,
    /// When it was applied.
    pub applied_on: Option<DateTime<Utc>>,
    /// Whether the change may run in the runner's environment.
    pub allowed: bool,
}

/// Discovers, orders, applies and rolls back schema changes.
pub struct SchemaChangeRunner {
    config: RunnerConfig,
    registry: ChangeRegistry,
    pool: Option<SqlitePool>,
    ledger: AppliedChangeLedger,
    changes: Option<Vec<ChangeRecord>>,
    execution_callbacks: Vec<ExecutionErrorCallback>,
    registration_callbacks: Vec<RegistrationErrorCallback>,
}

impl SchemaChangeRunner {
    /// Creates a runner. No database work happens until a pool is supplied.
    #[must_use]
    pub fn new(config: RunnerConfig, registry: ChangeRegistry) -> Self {
        let ledger = AppliedChangeLedger::new(config.tracking_table.clone());
        Self {
            config,
            registry,
            pool: None,
            ledger,
            changes: None,
            execution_callbacks: Vec::new(),
            registration_callbacks: Vec::new(),
        }
    }

    /// Supplies the connection pool.
    #[must_use]
    pub fn with_pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Supplies or replaces the connection pool.
    pub fn set_pool(&mut self, pool: SqlitePool) {
        self.pool = Some(pool);
    }

    /// Connects using the configured database URL.
    pub async fn connect(&mut self) -> Result<()> {
        let url = self
            .config
            .database_url
            .as_deref()
            .ok_or(RunnerError::ConnectionNotSet)?;
        info!(url = %url, "Connecting to database");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        self.pool = Some(pool);
        Ok(())
    }

    /// Returns the pool, or [`RunnerError::ConnectionNotSet`].
    pub fn pool(&self) -> Result<&SqlitePool> {
        self.pool.as_ref().ok_or(RunnerError::ConnectionNotSet)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Returns the environment changes are gated against.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.config.environment
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &AppliedChangeLedger {
        &self.ledger
    }

    /// Registers a callback for per-change execution failures.
    ///
    /// All callbacks run, in registration order.
    pub fn on_execution_error<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&ExecutionError, &ChangeRecord, &Self) + Send + Sync + 'static,
    {
        self.execution_callbacks.push(Box::new(callback));
        self
    }

    /// Registers a callback for discovery failures.
    ///
    /// All callbacks run, in registration order.
    pub fn on_registration_error<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&RegistrationError) + Send + Sync + 'static,
    {
        self.registration_callbacks.push(Box::new(callback));
        self
    }

    /// Discovers and sorts the changes. The result is cached.
    pub fn scan(&mut self) -> Result<&[ChangeRecord]> {
        if self.changes.is_none() {
            let callbacks = &self.registration_callbacks;
            let mut sink = |err: RegistrationError| {
                warn!(error = %err, "Change registration failed");
                for callback in callbacks {
                    callback(&err);
                }
            };

            let discovered = match &self.config.changes_dir {
                Some(dir) => {
                    info!(dir = %dir.display(), "Scanning for changes");
                    ChangeDiscovery::new(dir, self.config.namespace.as_str())
                        .with_extension(self.config.source_extension.as_str())
                        .discover(&self.registry, &mut sink)?
                }
                None => self.registry.instantiate_all(&mut sink),
            };

            let sorted = DependencyGraphSorter::new().sort(discovered)?;
            info!(count = sorted.len(), "Changes sorted");
            self.changes = Some(sorted);
        }
        Ok(self.changes())
    }

    /// Forgets the cached scan so the next operation discovers again.
    pub fn invalidate(&mut self) {
        self.changes = None;
    }

    /// Returns the sorted changes from the last scan.
    #[must_use]
    pub fn changes(&self) -> &[ChangeRecord] {
        self.changes.as_deref().unwrap_or(&[])
    }

    /// Ensures the tracking table exists.
    pub async fn install(&self) -> Result<()> {
        let mut conn = self.pool()?.acquire().await?;
        self.ledger.ensure_table(&mut conn).await
    }

    /// Drops the tracking table.
    pub async fn uninstall(&self) -> Result<()> {
        let mut conn = self.pool()?.acquire().await?;
        self.ledger.drop_table(&mut conn).await
    }

    /// Renders the tracking table DDL for `dialect`.
    #[must_use]
    pub fn tracking_table_sql(&self, dialect: &dyn TrackingDialect) -> String {
        self.ledger.create_table_sql(dialect)
    }

    async fn prepare(&mut self) -> Result<SqlitePool> {
        let pool = self.pool()?.clone();
        self.install().await?;
        self.scan()?;
        Ok(pool)
    }

    /// Applies every eligible change.
    ///
    /// Sweeps the sorted list until a sweep applies nothing. A failing change
    /// is reported to the execution-error callbacks and tried again in the
    /// next sweep. Returns the applied changes in the order they succeeded.
    pub async fn apply(&mut self) -> Result<Vec<ChangeRecord>> {
        let pool = self.prepare().await?;
        let mut applied = Vec::new();
        let mut sweep = 0;

        loop {
            sweep += 1;
            let mut progressed = false;

            for change in self.changes() {
                if !self.is_eligible(&pool, change).await? {
                    continue;
                }
                match self.apply_change(&pool, change).await {
                    Ok(record) => {
                        applied.push(record);
                        progressed = true;
                    }
                    Err(source) => {
                        self.report(ExecutionPhase::Apply, source, change);
                    }
                }
            }

            debug!(sweep, applied = applied.len(), "Sweep finished");
            if !progressed {
                break;
            }
        }

        info!(count = applied.len(), "Apply finished");
        Ok(applied)
    }

    /// Applies the first eligible change, if any.
    ///
    /// On failure the error is reported and `None` is returned; later
    /// candidates are not tried.
    pub async fn apply_one(&mut self) -> Result<Option<ChangeRecord>> {
        let pool = self.prepare().await?;

        for change in self.changes() {
            if !self.is_eligible(&pool, change).await? {
                continue;
            }
            return match self.apply_change(&pool, change).await {
                Ok(record) => Ok(Some(record)),
                Err(source) => {
                    self.report(ExecutionPhase::Apply, source, change);
                    Ok(None)
                }
            };
        }

        Ok(None)
    }

    /// Rolls back the most recently ordered applied change.
    pub async fn rollback(&mut self) -> Result<Option<ChangeRecord>> {
        let pool = self.prepare().await?;

        for change in self.changes().iter().rev() {
            if self.is_applied(&pool, change.name()).await? {
                return Ok(self.try_rollback(&pool, change).await.then(|| change.clone()));
            }
        }

        Ok(None)
    }

    /// Rolls back applied changes in reverse order.
    ///
    /// With `None`, every applied change is rolled back. With a target,
    /// rolling back stops after the target itself. An unknown target rolls
    /// back nothing. The first failure halts the walk, leaving earlier
    /// changes applied.
    pub async fn rollback_up_to(&mut self, target: Option<&str>) -> Result<Vec<ChangeRecord>> {
        let pool = self.prepare().await?;

        let target = match target {
            None => None,
            Some(wanted) => {
                let names = self.changes().iter().map(ChangeRecord::name);
                match resolve_name(names, wanted) {
                    Some(name) => Some(name.to_string()),
                    None => {
                        warn!(target = %wanted, "Rollback target is not a known change");
                        return Ok(Vec::new());
                    }
                }
            }
        };

        let mut rolled_back = Vec::new();
        for change in self.changes().iter().rev() {
            if self.is_applied(&pool, change.name()).await? {
                if !self.try_rollback(&pool, change).await {
                    break;
                }
                rolled_back.push(change.clone());
            }
            if target.as_deref() == Some(change.name()) {
                break;
            }
        }

        info!(count = rolled_back.len(), "Rollback finished");
        Ok(rolled_back)
    }

    /// Rolls back only the change named `name`, if it is applied.
    pub async fn rollback_change(&mut self, name: &str) -> Result<Option<ChangeRecord>> {
        let pool = self.prepare().await?;

        for change in self.changes().iter().rev() {
            if names_match(change.name(), name) && self.is_applied(&pool, change.name()).await? {
                return Ok(self.try_rollback(&pool, change).await.then(|| change.clone()));
            }
        }

        Ok(None)
    }

    /// Returns changes the ledger does not record yet, in order.
    pub async fn pending(&mut self) -> Result<Vec<ChangeRecord>> {
        let pool = self.prepare().await?;
        let mut conn = pool.acquire().await?;
        let applied = self.ledger.applied_names(&mut conn).await?;
        Ok(self
            .changes()
            .iter()
            .filter(|c| !applied.contains(c.name()))
            .cloned()
            .collect())
    }

    /// Returns the status of every change, in order.
    pub async fn status(&mut self) -> Result<Vec<ChangeStatus>> {
        let pool = self.prepare().await?;
        let mut conn = pool.acquire().await?;
        let applied: HashMap<String, Option<DateTime<Utc>>> = self
            .ledger
            .applied(&mut conn)
            .await?
            .into_iter()
            .map(|row| (row.name, row.applied_on))
            .collect();

        Ok(self
            .changes()
            .iter()
            .map(|change| {
                let entry = applied.get(change.name());
                ChangeStatus {
                    name: change.name().to_string(),
                    kind: change.kind(),
                    applied: entry.is_some(),
                    applied_on: entry.copied().flatten(),
                    allowed: change.is_allowed_in(self.environment()),
                }
            })
            .collect())
    }

    /// Maps a declared dependency to the name of a discovered change.
    fn resolve_dependency<'a>(&'a self, dependency: &'a str) -> &'a str {
        let names = self.changes().iter().map(ChangeRecord::name);
        resolve_name(names, dependency).unwrap_or(dependency)
    }

    async fn is_applied(&self, pool: &SqlitePool, name: &str) -> Result<bool> {
        let mut conn = pool.acquire().await?;
        self.ledger.is_applied(&mut conn, name).await
    }

    async fn is_eligible(&self, pool: &SqlitePool, change: &ChangeRecord) -> Result<bool> {
        let mut conn = pool.acquire().await?;

        if self.ledger.is_applied(&mut conn, change.name()).await? {
            return Ok(false);
        }

        if !change.is_allowed_in(self.environment()) {
            debug!(
                change = %change.name(),
                environment = %self.environment(),
                "Change not allowed in this environment, skipping"
            );
            return Ok(false);
        }

        for dependency in change.dependencies() {
            let resolved = self.resolve_dependency(dependency);
            if !self.ledger.is_applied(&mut conn, resolved).await? {
                debug!(
                    change = %change.name(),
                    dependency = %resolved,
                    "Dependency not applied yet, skipping"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn apply_change(
        &self,
        pool: &SqlitePool,
        change: &ChangeRecord,
    ) -> std::result::Result<ChangeRecord, ChangeError> {
        info!(change = %change.name(), kind = %change.kind(), "Applying change");

        let mut tx = pool.begin().await?;
        let outcome = async {
            change.execute(&mut tx).await?;
            let entry = self.ledger.record_applied(&mut tx, change).await?;
            Ok::<_, ChangeError>(entry)
        }
        .await;

        match outcome {
            Ok(entry) => {
                tx.commit().await?;
                info!(change = %change.name(), id = entry.id, "Change applied successfully");
                Ok(change.clone().with_ledger_entry(entry.id, entry.applied_on))
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn rollback_change_in_tx(
        &self,
        pool: &SqlitePool,
        change: &ChangeRecord,
    ) -> std::result::Result<(), ChangeError> {
        info!(change = %change.name(), kind = %change.kind(), "Rolling back change");

        let mut tx = pool.begin().await?;
        let outcome = async {
            change.rollback(&mut tx).await?;
            self.ledger.record_rolled_back(&mut tx, change.name()).await?;
            Ok::<_, ChangeError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                tx.commit().await?;
                info!(change = %change.name(), "Change rolled back successfully");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn try_rollback(&self, pool: &SqlitePool, change: &ChangeRecord) -> bool {
        match self.rollback_change_in_tx(pool, change).await {
            Ok(()) => true,
            Err(source) => {
                self.report(ExecutionPhase::Rollback, source, change);
                false
            }
        }
    }

    fn report(&self, phase: ExecutionPhase, source: ChangeError, change: &ChangeRecord) {
        let err = ExecutionError {
            change: change.name().to_string(),
            kind: change.kind(),
            phase,
            source,
        };
        warn!(error = %err, "Change failed");
        for callback in &self.execution_callbacks {
            callback(&err, change, self);
        }
    }
}
