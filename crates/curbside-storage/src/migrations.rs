//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use curbside_core::error::CurbsideError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), CurbsideError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CurbsideError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CurbsideError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: reports");
    }

    Ok(())
}

/// Version 1: reports table.
fn apply_v1(conn: &Connection) -> Result<(), CurbsideError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS reports (
            id              TEXT PRIMARY KEY NOT NULL,
            title           TEXT,
            description     TEXT,
            category        TEXT,
            severity        TEXT,
            suggested_fix   TEXT,
            ai_draft        TEXT,
            status          TEXT NOT NULL DEFAULT 'open',
            latitude        REAL,
            longitude       REAL,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reports_created_at
            ON reports (created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_reports_category
            ON reports (category, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_reports_severity
            ON reports (severity, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_reports_status
            ON reports (status, created_at DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'reports');
        ",
    )
    .map_err(|e| CurbsideError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
