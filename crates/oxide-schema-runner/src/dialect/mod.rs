//! Tracking-table DDL per database system.
//!
//! The ledger itself runs on SQLite; the other dialects render the same table
//! for databases where it is created by hand or by a separate tool.

mod mssql;
mod mysql;
mod sqlite;

pub use mssql::MssqlDialect;
pub use mysql::MySqlDialect;
pub use sqlite::SqliteDialect;

use crate::ledger::TrackingTable;

/// Length of the change name column.
pub const NAME_COLUMN_LENGTH: u32 = 125;

/// Length of the change type column.
pub const TYPE_COLUMN_LENGTH: u32 = 20;

/// Trait for database-specific tracking-table SQL.
pub trait TrackingDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Definition of the surrogate key column, without its name.
    fn id_column(&self) -> &'static str;

    /// Type used for the apply timestamp.
    fn timestamp_type(&self) -> &'static str;

    /// Type used for bounded strings.
    fn string_type(&self, length: u32) -> String {
        format!("VARCHAR({length})")
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Column definitions for `table`, in table order.
    fn column_definitions(&self, table: &TrackingTable) -> Vec<String> {
        let mut columns = vec![
            format!("{} {}", self.quote_identifier("id"), self.id_column()),
            format!(
                "{} {} NOT NULL",
                self.quote_identifier(&table.name_column),
                self.string_type(NAME_COLUMN_LENGTH)
            ),
        ];
        if let Some(type_column) = &table.type_column {
            columns.push(format!(
                "{} {} NOT NULL",
                self.quote_identifier(type_column),
                self.string_type(TYPE_COLUMN_LENGTH)
            ));
        }
        columns.push(format!(
            "{} {} NOT NULL",
            self.quote_identifier(&table.applied_on_column),
            self.timestamp_type()
        ));
        columns
    }

    /// Generates SQL that creates `table` unless it already exists.
    fn create_table_sql(&self, table: &TrackingTable) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            self.quote_identifier(&table.table),
            self.column_definitions(table).join(",\n  ")
        )
    }

    /// Generates SQL that drops `table` if it exists.
    fn drop_table_sql(&self, table: &TrackingTable) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(&table.table))
    }
}
