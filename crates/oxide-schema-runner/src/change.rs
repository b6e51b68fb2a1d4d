//! Migrations, seeders and the record the runner works with.
//!
//! User code implements either [`Migration`] or [`Seeder`]. Both are wrapped
//! into a [`ChangeRecord`], which exposes one interface to the sorter and the
//! runner and dispatches on its [`ChangeKind`] tag.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::error::ChangeError;

/// Result returned by change bodies.
pub type ChangeResult = std::result::Result<(), ChangeError>;

/// What kind of schema change a record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Schema-altering change with `up` and `down`.
    Migration,
    /// Data-populating change with `run` and an optional `rollback`.
    Seeder,
}

impl ChangeKind {
    /// Returns the value stored in the tracking table's type column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Migration => "migration",
            Self::Seeder => "seeder",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "migration" => Ok(Self::Migration),
            "seeder" => Ok(Self::Seeder),
            other => Err(format!("unknown change kind '{other}'")),
        }
    }
}

/// A schema migration.
///
/// Every statement is issued through `conn`, which is the connection of the
/// transaction the runner opened for this change. Returning an error rolls
/// the whole change back.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Default)]
/// pub struct CreateUsers;
///
/// #[async_trait]
/// impl Migration for CreateUsers {
///     async fn up(&self, conn: &mut SqliteConnection) -> ChangeResult {
///         sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY)")
///             .execute(&mut *conn)
///             .await?;
///         Ok(())
///     }
///
///     async fn down(&self, conn: &mut SqliteConnection) -> ChangeResult {
///         sqlx::query("DROP TABLE users").execute(&mut *conn).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Migration: Send + Sync + 'static {
    /// Applies the migration.
    async fn up(&self, conn: &mut SqliteConnection) -> ChangeResult;

    /// Reverses the migration.
    async fn down(&self, conn: &mut SqliteConnection) -> ChangeResult;

    /// Identity of the migration. Defaults to the Rust type path.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Names of changes that must be applied first.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Environments the migration may run in. Empty means all.
    fn environments(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A data seeder.
#[async_trait]
pub trait Seeder: Send + Sync + 'static {
    /// Populates data.
    async fn run(&self, conn: &mut SqliteConnection) -> ChangeResult;

    /// Removes seeded data. Does nothing unless overridden.
    async fn rollback(&self, _conn: &mut SqliteConnection) -> ChangeResult {
        Ok(())
    }

    /// Identity of the seeder. Defaults to the Rust type path.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Names of changes that must be applied first.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Environments the seeder may run in. Empty means all.
    fn environments(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Clone)]
enum ChangeBody {
    Migration(Arc<dyn Migration>),
    Seeder(Arc<dyn Seeder>),
}

/// One migration or seeder, as seen by the sorter and the runner.
#[derive(Clone)]
pub struct ChangeRecord {
    name: String,
    dependencies: Vec<String>,
    environments: BTreeSet<String>,
    body: ChangeBody,
    id: Option<i64>,
    applied_at: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    /// Wraps a migration.
    pub fn migration<M: Migration>(migration: M) -> Self {
        let name = migration.name();
        let dependencies = migration.dependencies();
        let environments = migration.environments();
        Self::build(
            name,
            dependencies,
            environments,
            ChangeBody::Migration(Arc::new(migration)),
        )
    }

    /// Wraps a seeder.
    pub fn seeder<S: Seeder>(seeder: S) -> Self {
        let name = seeder.name();
        let dependencies = seeder.dependencies();
        let environments = seeder.environments();
        Self::build(
            name,
            dependencies,
            environments,
            ChangeBody::Seeder(Arc::new(seeder)),
        )
    }

    fn build(
        name: String,
        dependencies: Vec<String>,
        environments: Vec<String>,
        body: ChangeBody,
    ) -> Self {
        let mut seen = BTreeSet::new();
        let dependencies = dependencies
            .into_iter()
            .filter(|dep| seen.insert(dep.clone()))
            .collect();

        Self {
            name,
            dependencies,
            environments: environments.into_iter().collect(),
            body,
            id: None,
            applied_at: None,
        }
    }

    /// Overrides the derived name with an explicit one.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the change identity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the change kind.
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        match self.body {
            ChangeBody::Migration(_) => ChangeKind::Migration,
            ChangeBody::Seeder(_) => ChangeKind::Seeder,
        }
    }

    /// Returns the declared dependencies, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Returns the environments this change is restricted to.
    #[must_use]
    pub fn environments(&self) -> &BTreeSet<String> {
        &self.environments
    }

    /// Returns whether the change may run in `environment`.
    #[must_use]
    pub fn is_allowed_in(&self, environment: &str) -> bool {
        self.environments.is_empty() || self.environments.contains(environment)
    }

    /// Ledger id, once the change has been recorded.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// When the ledger recorded the change.
    #[must_use]
    pub fn applied_at(&self) -> Option<DateTime<Utc>> {
        self.applied_at
    }

    pub(crate) fn with_ledger_entry(mut self, id: i64, applied_at: Option<DateTime<Utc>>) -> Self {
        self.id = Some(id);
        self.applied_at = applied_at;
        self
    }

    /// Runs the forward operation: `up` for migrations, `run` for seeders.
    pub async fn execute(&self, conn: &mut SqliteConnection) -> ChangeResult {
        match &self.body {
            ChangeBody::Migration(m) => m.up(conn).await,
            ChangeBody::Seeder(s) => s.run(conn).await,
        }
    }

    /// Runs the reverse operation: `down` for migrations, `rollback` for seeders.
    pub async fn rollback(&self, conn: &mut SqliteConnection) -> ChangeResult {
        match &self.body {
            ChangeBody::Migration(m) => m.down(conn).await,
            ChangeBody::Seeder(s) => s.rollback(conn).await,
        }
    }
}

impl fmt::Debug for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRecord")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("dependencies", &self.dependencies)
            .field("environments", &self.environments)
            .field("id", &self.id)
            .finish()
    }
}
