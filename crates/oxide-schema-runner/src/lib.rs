//! Dependency-ordered migrations and seeders for Rust.
//!
//! `oxide-schema-runner` applies schema changes written in Rust:
//! - Changes declare the changes they depend on and the environments they
//!   may run in
//! - Each change runs in its own transaction together with its ledger entry
//! - One failing change is reported and skipped; the rest of the run goes on
//!
//! # Architecture
//!
//! - **Change** - [`Migration`](change::Migration) (`up`/`down`) and
//!   [`Seeder`](change::Seeder) (`run`/`rollback`), wrapped in a
//!   [`ChangeRecord`](change::ChangeRecord)
//! - **Registry** - Factories for change types, registered explicitly
//! - **Discovery** - Maps files in a change directory to registry entries
//! - **Sorter** - Orders changes so dependencies come first
//! - **Ledger** - The tracking table recording applied changes
//! - **Runner** - Applies and rolls back changes
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_schema_runner::prelude::*;
//!
//! #[derive(Default)]
//! pub struct CreateUsers;
//!
//! #[async_trait]
//! impl Migration for CreateUsers {
//!     async fn up(&self, conn: &mut SqliteConnection) -> ChangeResult {
//!         sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
//!             .execute(&mut *conn)
//!             .await?;
//!         Ok(())
//!     }
//!
//!     async fn down(&self, conn: &mut SqliteConnection) -> ChangeResult {
//!         sqlx::query("DROP TABLE users").execute(&mut *conn).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Default)]
//! pub struct SeedAdmin;
//!
//! #[async_trait]
//! impl Seeder for SeedAdmin {
//!     async fn run(&self, conn: &mut SqliteConnection) -> ChangeResult {
//!         sqlx::query("INSERT INTO users (name) VALUES ('admin')")
//!             .execute(&mut *conn)
//!             .await?;
//!         Ok(())
//!     }
//!
//!     fn dependencies(&self) -> Vec<String> {
//!         vec!["CreateUsers".into()]
//!     }
//!
//!     fn environments(&self) -> Vec<String> {
//!         vec!["dev".into()]
//!     }
//! }
//!
//! let mut registry = ChangeRegistry::new();
//! registry
//!     .register_migration::<CreateUsers>()
//!     .register_seeder::<SeedAdmin>();
//!
//! let mut runner = SchemaChangeRunner::new(RunnerConfig::from_env()?, registry);
//! runner.on_execution_error(|err, _change, _runner| eprintln!("{err}"));
//! runner.connect().await?;
//!
//! let applied = runner.apply().await?;
//! ```

pub mod change;
pub mod config;
pub mod dialect;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod runner;
pub mod sorter;

pub use async_trait::async_trait;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::change::{ChangeKind, ChangeRecord, ChangeResult, Migration, Seeder};
    pub use crate::config::RunnerConfig;
    pub use crate::dialect::{MssqlDialect, MySqlDialect, SqliteDialect, TrackingDialect};
    pub use crate::discovery::ChangeDiscovery;
    pub use crate::error::{
        ChangeError, ExecutionError, ExecutionPhase, RegistrationError, Result, RunnerError,
    };
    pub use crate::ledger::{AppliedChange, AppliedChangeLedger, TrackingTable};
    pub use crate::registry::ChangeRegistry;
    pub use crate::runner::{ChangeStatus, SchemaChangeRunner};
    pub use crate::sorter::DependencyGraphSorter;
    pub use async_trait::async_trait;
    pub use sqlx::SqliteConnection;
}
