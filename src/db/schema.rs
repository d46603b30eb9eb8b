// src/db/schema.rs

//! SQLite schema and migrations for the persistent package store
//!
//! Tables:
//! - packages: one row per fingerprint, the full record stored as JSON
//! - provides: provided category/name per provider, for provides lookups
//! - files: file ownership, for file → package queries

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::DatabaseError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema: packages and provides
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE packages (
            fingerprint TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            record TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX idx_packages_name ON packages(category, name);

        CREATE TABLE provides (
            fingerprint TEXT NOT NULL,
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY (fingerprint) REFERENCES packages(fingerprint) ON DELETE CASCADE
        );

        CREATE INDEX idx_provides_name ON provides(category, name);
        ",
    )?;
    Ok(())
}

/// File ownership index
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE files (
            fingerprint TEXT NOT NULL,
            path TEXT NOT NULL,
            UNIQUE(fingerprint, path),
            FOREIGN KEY (fingerprint) REFERENCES packages(fingerprint) ON DELETE CASCADE
        );

        CREATE INDEX idx_files_path ON files(path);
        CREATE INDEX idx_files_fingerprint ON files(fingerprint);
        ",
    )?;
    Ok(())
}
