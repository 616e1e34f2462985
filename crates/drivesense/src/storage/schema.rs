//! `SQLite` schema definitions for the snapshot database.
//!
//! The `snapshot` table holds at most one row (`id = 1`); every save replaces
//! it inside a transaction.

/// Row id of the single snapshot record.
pub const SNAPSHOT_ROW_ID: i64 = 1;

/// SQL statement to create the snapshot table.
pub const CREATE_SNAPSHOT_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS snapshot (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    ax REAL NOT NULL DEFAULT 0,
    ay REAL NOT NULL DEFAULT 0,
    az REAL NOT NULL DEFAULT 0,
    gx REAL NOT NULL DEFAULT 0,
    gy REAL NOT NULL DEFAULT 0,
    gz REAL NOT NULL DEFAULT 0,
    hb INTEGER NOT NULL DEFAULT 0,
    ra INTEGER NOT NULL DEFAULT 0,
    mts REAL NOT NULL DEFAULT 0,
    timestamp INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// Replace the snapshot row.
pub const UPSERT_SNAPSHOT: &str = r"
INSERT OR REPLACE INTO snapshot (id, ax, ay, az, gx, gy, gz, hb, ra, mts, timestamp, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
";

/// Read the snapshot row.
pub const SELECT_SNAPSHOT: &str = r"
SELECT ax, ay, az, gx, gy, gz, hb, ra, mts, timestamp FROM snapshot WHERE id = ?1
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[CREATE_SNAPSHOT_TABLE];
