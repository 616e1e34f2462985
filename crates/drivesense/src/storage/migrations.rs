//! Schema versioning for the `SQLite` snapshot backend.
//!
//! The schema version lives in `PRAGMA user_version`. Each entry in
//! [`MIGRATIONS`] brings the database from `version - 1` to `version` and runs
//! inside one transaction together with the version bump.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::schema::{CREATE_SNAPSHOT_TABLE, SCHEMA_STATEMENTS};

/// A single schema step.
#[derive(Debug)]
pub struct Migration {
    /// Version the database is at after this step.
    pub version: i32,
    /// Statements to execute.
    pub statements: &'static [&'static str],
}

/// Ordered list of schema steps.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    statements: &[CREATE_SNAPSHOT_TABLE],
}];

/// The schema version this build expects.
pub const CURRENT_VERSION: i32 = 1;

/// Bring the database schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if the database was written by a newer build or a
/// migration step fails.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        apply(conn, migration)?;
    }

    // Statements are idempotent; this repairs a database whose tables were
    // dropped behind our back.
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    Ok(())
}

/// Read the schema version, 0 for a fresh database.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read.
pub fn schema_version(conn: &Connection) -> Result<i32> {
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<()> {
    debug!("Applying schema migration v{}", migration.version);
    let tx = conn.transaction()?;
    for statement in migration.statements {
        tx.execute(statement, [])
            .map_err(|e| Error::DatabaseMigration {
                message: format!("v{}: {e}", migration.version),
            })?;
    }
    tx.pragma_update(None, "user_version", migration.version)?;
    tx.commit()?;
    info!("Snapshot database migrated to v{}", migration.version);
    Ok(())
}
