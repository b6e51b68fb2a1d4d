//! Applied-change tracking.
//!
//! This module manages the tracking table (`schema_changes` by default) that
//! records which changes have been applied. A row means "applied"; no row
//! means "pending".
//!
//! Every method takes the connection to use, so that the ledger write for a
//! change happens inside the same transaction as the change itself.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use tracing::{debug, warn};

use crate::change::{ChangeKind, ChangeRecord};
use crate::dialect::{SqliteDialect, TrackingDialect};
use crate::error::{Result, RunnerError};

/// Layout of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingTable {
    /// Table name.
    pub table: String,
    /// Column holding the change name.
    pub name_column: String,
    /// Column holding the change kind, if the layout has one.
    pub type_column: Option<String>,
    /// Column holding the apply timestamp.
    pub applied_on_column: String,
}

impl Default for TrackingTable {
    fn default() -> Self {
        Self {
            table: "schema_changes".to_string(),
            name_column: "change_name".to_string(),
            type_column: Some("type".to_string()),
            applied_on_column: "applied_on".to_string(),
        }
    }
}

impl TrackingTable {
    /// The older migrations-only layout: `migrations(id, name, applied_on)`.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            table: "migrations".to_string(),
            name_column: "name".to_string(),
            type_column: None,
            applied_on_column: "applied_on".to_string(),
        }
    }

    /// Uses a different table name.
    #[must_use]
    pub fn named(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }
}

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    /// Surrogate key.
    pub id: i64,
    /// Change name.
    pub name: String,
    /// Change kind; `None` for layouts without a type column.
    pub kind: Option<ChangeKind>,
    /// When the change was applied; `None` if the stored value is unreadable.
    pub applied_on: Option<DateTime<Utc>>,
}

/// Reads and writes the tracking table.
#[derive(Debug, Clone, Default)]
pub struct AppliedChangeLedger {
    table: TrackingTable,
    dialect: SqliteDialect,
}

impl AppliedChangeLedger {
    /// Creates a ledger over the given table layout.
    #[must_use]
    pub fn new(table: TrackingTable) -> Self {
        Self {
            table,
            dialect: SqliteDialect::new(),
        }
    }

    /// Returns the table layout.
    #[must_use]
    pub fn table(&self) -> &TrackingTable {
        &self.table
    }

    /// Renders the tracking table DDL for any dialect.
    #[must_use]
    pub fn create_table_sql(&self, dialect: &dyn TrackingDialect) -> String {
        dialect.create_table_sql(&self.table)
    }

    fn quoted_table(&self) -> String {
        self.dialect.quote_identifier(&self.table.table)
    }

    fn quoted_name(&self) -> String {
        self.dialect.quote_identifier(&self.table.name_column)
    }

    /// Ensures the tracking table exists.
    pub async fn ensure_table(&self, conn: &mut SqliteConnection) -> Result<()> {
        let sql = self.dialect.create_table_sql(&self.table);
        debug!(sql = %sql, "Ensuring tracking table");
        sqlx::query(&sql).execute(&mut *conn).await?;
        Ok(())
    }

    /// Drops the tracking table.
    pub async fn drop_table(&self, conn: &mut SqliteConnection) -> Result<()> {
        let sql = self.dialect.drop_table_sql(&self.table);
        debug!(sql = %sql, "Dropping tracking table");
        sqlx::query(&sql).execute(&mut *conn).await?;
        Ok(())
    }

    /// Checks if a change has been applied (exactly one matching row).
    pub async fn is_applied(&self, conn: &mut SqliteConnection, name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            self.quoted_table(),
            self.quoted_name()
        );
        let row: (i64,) = sqlx::query_as(&sql)
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row.0 == 1)
    }

    /// Records a change as applied.
    pub async fn record_applied(
        &self,
        conn: &mut SqliteConnection,
        change: &ChangeRecord,
    ) -> Result<AppliedChange> {
        let applied_on = Utc::now();
        let applied_on_column = self.dialect.quote_identifier(&self.table.applied_on_column);

        let result = match &self.table.type_column {
            Some(type_column) => {
                let sql = format!(
                    "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
                    self.quoted_table(),
                    self.quoted_name(),
                    self.dialect.quote_identifier(type_column),
                    applied_on_column
                );
                debug!(sql = %sql, change = %change.name(), "Recording change");
                sqlx::query(&sql)
                    .bind(change.name())
                    .bind(change.kind().as_str())
                    .bind(applied_on.to_rfc3339())
                    .execute(&mut *conn)
                    .await?
            }
            None => {
                let sql = format!(
                    "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                    self.quoted_table(),
                    self.quoted_name(),
                    applied_on_column
                );
                debug!(sql = %sql, change = %change.name(), "Recording change");
                sqlx::query(&sql)
                    .bind(change.name())
                    .bind(applied_on.to_rfc3339())
                    .execute(&mut *conn)
                    .await?
            }
        };

        Ok(AppliedChange {
            id: result.last_insert_rowid(),
            name: change.name().to_string(),
            kind: self.table.type_column.as_ref().map(|_| change.kind()),
            applied_on: Some(applied_on),
        })
    }

    /// Removes the record of a change (for rollback).
    pub async fn record_rolled_back(&self, conn: &mut SqliteConnection, name: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.quoted_table(),
            self.quoted_name()
        );
        debug!(sql = %sql, change = %name, "Removing change record");
        let result = sqlx::query(&sql).bind(name).execute(&mut *conn).await?;

        if result.rows_affected() == 0 {
            return Err(RunnerError::LedgerEntryNotFound(name.to_string()));
        }

        Ok(())
    }

    /// Gets all applied changes, oldest first.
    pub async fn applied(&self, conn: &mut SqliteConnection) -> Result<Vec<AppliedChange>> {
        let type_column = self
            .table
            .type_column
            .as_ref()
            .map_or_else(|| "NULL".to_string(), |c| self.dialect.quote_identifier(c));
        let sql = format!(
            "SELECT {}, {}, {}, {} FROM {} ORDER BY {}",
            self.dialect.quote_identifier("id"),
            self.quoted_name(),
            type_column,
            self.dialect.quote_identifier(&self.table.applied_on_column),
            self.quoted_table(),
            self.dialect.quote_identifier("id"),
        );

        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        let mut changes = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: Option<String> = row.try_get(2)?;
            let applied_on: String = row.try_get(3)?;
            changes.push(AppliedChange {
                id: row.try_get(0)?,
                name: row.try_get(1)?,
                kind: kind.and_then(|k| k.parse().ok()),
                applied_on: parse_timestamp(&applied_on),
            });
        }

        Ok(changes)
    }

    /// Gets the set of applied change names.
    pub async fn applied_names(&self, conn: &mut SqliteConnection) -> Result<HashSet<String>> {
        let sql = format!("SELECT {} FROM {}", self.quoted_name(), self.quoted_table());
        let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Counts applied changes.
    pub async fn count(&self, conn: &mut SqliteConnection) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.quoted_table());
        let row: (i64,) = sqlx::query_as(&sql).fetch_one(&mut *conn).await?;
        Ok(row.0)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Rows written by hand with datetime('now')
    match chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        Ok(dt) => Some(dt.and_utc()),
        Err(err) => {
            warn!(value, error = %err, "Unreadable applied_on timestamp");
            None
        }
    }
}
