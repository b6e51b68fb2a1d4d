//! SQL Server tracking-table dialect.

use super::TrackingDialect;
use crate::ledger::TrackingTable;

/// Microsoft SQL Server dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Creates a new SQL Server dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TrackingDialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn id_column(&self) -> &'static str {
        "INT IDENTITY(1,1) PRIMARY KEY"
    }

    fn timestamp_type(&self) -> &'static str {
        "DATETIME2"
    }

    fn string_type(&self, length: u32) -> String {
        format!("NVARCHAR({length})")
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    // SQL Server has no CREATE TABLE IF NOT EXISTS.
    fn create_table_sql(&self, table: &TrackingTable) -> String {
        format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL\nCREATE TABLE {} (\n  {}\n)",
            table.table.replace('\'', "''"),
            self.quote_identifier(&table.table),
            self.column_definitions(table).join(",\n  ")
        )
    }
}
