//! Error types for the schema change runner.
//!
//! Errors come in two flavours. [`RunnerError`] is returned to the caller and
//! means the run as a whole cannot proceed. [`ExecutionError`] and
//! [`RegistrationError`] describe a single change or file that failed; they
//! are delivered to the callbacks registered on the runner and never abort a
//! batch.

use std::fmt;
use std::path::PathBuf;

use crate::change::ChangeKind;

/// Fatal errors raised by the runner, discovery, sorter and ledger.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The change directory does not exist or cannot be listed.
    #[error("Invalid change directory '{}': {source}", .path.display())]
    InvalidPath {
        /// The directory that was scanned.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// Names along the cycle, starting and ending with the same change.
        cycle: Vec<String>,
    },

    /// A database operation was attempted before a connection was supplied.
    #[error("Database connection not set")]
    ConnectionNotSet,

    /// Database error while reading or writing the tracking table.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A ledger row was expected but not found.
    #[error("No ledger entry for change '{0}'")]
    LedgerEntryNotFound(String),

    /// Configuration could not be deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration is well-formed but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Error returned by the body of a migration or seeder.
#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    /// A statement issued by the change failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The change reported a failure of its own.
    #[error("{0}")]
    Failed(String),

    /// Any other error raised by user code.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ChangeError {
    /// Creates a [`ChangeError::Failed`] from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<RunnerError> for ChangeError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Database(e) => Self::Database(e),
            other => Self::Other(Box::new(other)),
        }
    }
}

/// The step during which a change failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Forward application (`up` / `run`).
    Apply,
    /// Reversal (`down` / `rollback`).
    Rollback,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => f.write_str("apply"),
            Self::Rollback => f.write_str("roll back"),
        }
    }
}

/// A single change failed; the surrounding transaction was rolled back.
#[derive(Debug, thiserror::Error)]
#[error("Failed to {phase} {kind} '{change}': {source}")]
pub struct ExecutionError {
    /// Name of the failing change.
    pub change: String,
    /// Kind of the failing change.
    pub kind: ChangeKind,
    /// What the runner was doing when it failed.
    pub phase: ExecutionPhase,
    /// The underlying failure.
    #[source]
    pub source: ChangeError,
}

/// A file or registry entry could not be turned into a change.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// A file maps to a type name that nothing registered.
    #[error("No change registered for '{type_name}' (from {})", .path.display())]
    Unregistered {
        /// File that was discovered.
        path: PathBuf,
        /// Type name derived from the file.
        type_name: String,
    },

    /// The factory for a registered type refused to build it.
    #[error("Cannot instantiate '{type_name}': {message}")]
    Instantiation {
        /// Registered type name.
        type_name: String,
        /// Reason given by the factory.
        message: String,
    },

    /// A directory entry could not be inspected.
    #[error("Cannot read directory entry in {}: {source}", .path.display())]
    UnreadableEntry {
        /// Directory being scanned.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
