//! Additive schema migrations
//!
//! The exchange table is created with its original column set, then every
//! later column is declared in [`COLUMN_MIGRATIONS`]. On open, the live column
//! set is read with `PRAGMA table_info` and missing columns are added, all in
//! one transaction. Columns are never dropped or renamed.

use std::collections::HashSet;

use rusqlite::{Connection, Transaction};
use tracing::info;

use crate::defaults::EXCHANGE_TABLE;
use crate::error::{AppError, Result};

/// One column that may be missing from an older store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMigration {
    pub table: &'static str,
    pub column: &'static str,
    pub sql_type: &'static str,
    /// SQL literal used for rows that predate the column
    pub default: &'static str,
}

/// Columns added after the first release, in the order they were introduced
pub const COLUMN_MIGRATIONS: &[ColumnMigration] = &[
    ColumnMigration {
        table: EXCHANGE_TABLE,
        column: "request_body_size",
        sql_type: "INTEGER",
        default: "0",
    },
    ColumnMigration {
        table: EXCHANGE_TABLE,
        column: "is_request_body_text",
        sql_type: "BOOLEAN",
        default: "0",
    },
    ColumnMigration {
        table: EXCHANGE_TABLE,
        column: "response_body_size",
        sql_type: "INTEGER",
        default: "0",
    },
    ColumnMigration {
        table: EXCHANGE_TABLE,
        column: "is_response_body_text",
        sql_type: "BOOLEAN",
        default: "0",
    },
];

const CREATE_BASE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp DATETIME,
    method TEXT,
    url TEXT,
    request_headers TEXT,
    request_body BLOB,
    status_code INTEGER,
    response_headers TEXT,
    response_body BLOB
);
CREATE INDEX IF NOT EXISTS requests_timestamp_idx ON requests(timestamp);
"#;

/// What a migration run changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// `table.column` for every column that was added
    pub added: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
    }
}

/// Bring the store to the current schema
pub fn apply_migrations(conn: &mut Connection) -> Result<MigrationReport> {
    apply(conn, COLUMN_MIGRATIONS)
}

pub(crate) fn apply(conn: &mut Connection, migrations: &[ColumnMigration]) -> Result<MigrationReport> {
    let tx = conn
        .transaction()
        .map_err(|e| AppError::MigrationError(format!("Failed to begin transaction: {e}")))?;

    tx.execute_batch(CREATE_BASE_TABLE)
        .map_err(|e| AppError::MigrationError(format!("Failed to create base table: {e}")))?;

    let mut report = MigrationReport::default();
    for migration in migrations {
        let existing = table_columns(&tx, migration.table)?;
        if existing.contains(migration.column) {
            continue;
        }

        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {} DEFAULT {}",
            migration.table, migration.column, migration.sql_type, migration.default
        );
        tx.execute_batch(&sql).map_err(|e| {
            AppError::MigrationError(format!(
                "Failed to add column {} to {}: {e}",
                migration.column, migration.table
            ))
        })?;

        info!("Added column {} to table {}", migration.column, migration.table);
        report
            .added
            .push(format!("{}.{}", migration.table, migration.column));
    }

    // Dropping `tx` on any early return above rolls everything back
    tx.commit()
        .map_err(|e| AppError::MigrationError(format!("Failed to commit migration: {e}")))?;

    Ok(report)
}

/// Current column names of `table`
pub fn table_columns(conn: &Transaction<'_>, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| AppError::MigrationError(format!("Failed to read columns of {table}: {e}")))?;

    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| AppError::MigrationError(format!("Failed to read columns of {table}: {e}")))?
        .collect::<std::result::Result<HashSet<_>, _>>()
        .map_err(|e| AppError::MigrationError(format!("Failed to read columns of {table}: {e}")))?;

    Ok(names)
}
