//! Runner configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::discovery::DEFAULT_EXTENSION;
use crate::error::{Result, RunnerError};
use crate::ledger::TrackingTable;

/// Environment a runner targets unless told otherwise.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Construction-time configuration of a [`SchemaChangeRunner`](crate::runner::SchemaChangeRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory holding change sources. When unset, every registered change is used.
    pub changes_dir: Option<PathBuf>,
    /// Module prefix joined to file stems to form type names.
    pub namespace: String,
    /// Environment tag used to gate changes.
    pub environment: String,
    /// Extension of change source files.
    pub source_extension: String,
    /// Layout of the tracking table.
    pub tracking_table: TrackingTable,
    /// SQLite URL. May be supplied later instead.
    pub database_url: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            changes_dir: None,
            namespace: String::new(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            source_extension: DEFAULT_EXTENSION.to_string(),
            tracking_table: TrackingTable::default(),
            database_url: None,
        }
    }
}

impl RunnerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `DATABASE_URL`, `SCHEMA_CHANGES_DIR`, `SCHEMA_CHANGES_NAMESPACE`
    /// and `APP_ENV`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            database_url: lookup("DATABASE_URL"),
            changes_dir: lookup("SCHEMA_CHANGES_DIR").map(PathBuf::from),
            namespace: lookup("SCHEMA_CHANGES_NAMESPACE").unwrap_or_default(),
            environment: lookup("APP_ENV").unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.environment.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "environment must not be empty".to_string(),
            ));
        }
        if self.source_extension.is_empty() || self.source_extension.starts_with('.') {
            return Err(RunnerError::InvalidConfig(format!(
                "source extension '{}' must be non-empty and given without a dot",
                self.source_extension
            )));
        }
        if self.tracking_table.table.is_empty() || self.tracking_table.name_column.is_empty() {
            return Err(RunnerError::InvalidConfig(
                "tracking table and name column must be named".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the change directory.
    #[must_use]
    pub fn with_changes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.changes_dir = Some(dir.into());
        self
    }

    /// Sets the namespace prefix.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the environment tag.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Sets the source file extension.
    #[must_use]
    pub fn with_source_extension(mut self, extension: impl Into<String>) -> Self {
        self.source_extension = extension.into();
        self
    }

    /// Sets the tracking table layout.
    #[must_use]
    pub fn with_tracking_table(mut self, table: TrackingTable) -> Self {
        self.tracking_table = table;
        self
    }

    /// Sets the database URL.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}
