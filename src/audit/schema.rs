/*!
 * Audit schema and versioning.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 1;

/// Create the tables on a fresh database, otherwise check the stored version
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    let current_version = stored_version(conn)?;
    if current_version == 0 {
        info!("Initializing audit schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        anyhow::bail!(
            "Audit database schema v{} is newer than supported v{}",
            current_version,
            SCHEMA_VERSION
        );
    } else {
        debug!("Audit schema is up to date (v{})", current_version);
    }
    Ok(())
}

fn stored_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .context("Failed to check schema_version table")?;
    if !table_exists {
        return Ok(0);
    }
    Ok(conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0))
}

fn set_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, datetime('now'))",
        [version],
    )?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            document_path TEXT NOT NULL,
            document_hash TEXT NOT NULL,
            source_language TEXT NOT NULL,
            target_language TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            total INTEGER NOT NULL DEFAULT 0,
            processed INTEGER NOT NULL DEFAULT 0,
            exact_matches INTEGER NOT NULL DEFAULT 0,
            fuzzy_repairs INTEGER NOT NULL DEFAULT 0,
            new_translations INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            fallbacks INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            checkpoints INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_runs_document_hash ON runs(document_hash);
        CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);

        CREATE TABLE IF NOT EXISTS segment_outcomes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            segment_id TEXT NOT NULL,
            state TEXT NOT NULL,
            decision TEXT,
            weighted_score REAL,
            provenance TEXT,
            error TEXT,
            resumed INTEGER NOT NULL DEFAULT 0,
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outcomes_run ON segment_outcomes(run_id);
        "#,
    )
    .context("Failed to create audit tables")?;
    Ok(())
}
