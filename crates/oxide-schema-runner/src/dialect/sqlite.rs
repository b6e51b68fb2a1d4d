//! SQLite tracking-table dialect.

use super::TrackingDialect;

/// SQLite dialect. This is the one the ledger executes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TrackingDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn id_column(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }

    // Stored as RFC 3339 text.
    fn timestamp_type(&self) -> &'static str {
        "TEXT"
    }
}
