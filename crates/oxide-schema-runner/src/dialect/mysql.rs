//! MySQL tracking-table dialect.

use super::TrackingDialect;

/// MySQL / MariaDB dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TrackingDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn id_column(&self) -> &'static str {
        "INT AUTO_INCREMENT PRIMARY KEY"
    }

    fn timestamp_type(&self) -> &'static str {
        "DATETIME"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TrackingTable;

    #[test]
    fn test_create_table() {
        let sql = MySqlDialect::new().create_table_sql(&TrackingTable::default());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `schema_changes`"));
        assert!(sql.contains("`id` INT AUTO_INCREMENT PRIMARY KEY"));
        assert!(sql.contains("`applied_on` DATETIME NOT NULL"));
    }

    #[test]
    fn test_quote_identifier_escapes_backtick() {
        assert_eq!(MySqlDialect::new().quote_identifier("odd`name"), "`odd``name`");
    }
}
