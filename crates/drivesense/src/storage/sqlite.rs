//! `SQLite` backend.
//!
//! The snapshot lives in a single-row table. `rusqlite` is blocking, so every
//! operation runs on the blocking pool with the connection behind a mutex.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::migrations;
use super::schema::{SELECT_SNAPSHOT, SNAPSHOT_ROW_ID, UPSERT_SNAPSHOT};
use super::{ensure_parent_dir, SnapshotBackend};
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// Path reported for in-memory databases.
const MEMORY_PATH: &str = ":memory:";

/// Snapshot stored in an `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open or create the database at `path` and bring its schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;

        debug!("Opening snapshot database at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL keeps readers (e.g. `drivesense status`) off the writer's lock.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        migrations::initialize_schema(&mut conn)?;

        info!("Snapshot database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(MEMORY_PATH),
            source,
        })?;
        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(MEMORY_PATH),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::internal("sqlite connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::internal(format!("sqlite task failed: {e}")))?
    }
}

fn read_snapshot(conn: &Connection) -> Result<Option<Snapshot>> {
    let snapshot = conn
        .query_row(SELECT_SNAPSHOT, [SNAPSHOT_ROW_ID], row_to_snapshot)
        .optional()?;
    Ok(snapshot)
}

fn write_snapshot(conn: &mut Connection, snapshot: &Snapshot) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        UPSERT_SNAPSHOT,
        params![
            SNAPSHOT_ROW_ID,
            snapshot.ax,
            snapshot.ay,
            snapshot.az,
            snapshot.gx,
            snapshot.gy,
            snapshot.gz,
            snapshot.hb,
            snapshot.ra,
            snapshot.mts,
            snapshot.timestamp,
            Utc::now().to_rfc3339(),
        ],
    )?;
    tx.commit()?;
    Ok(())
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        ax: row.get(0)?,
        ay: row.get(1)?,
        az: row.get(2)?,
        gx: row.get(3)?,
        gy: row.get(4)?,
        gz: row.get(5)?,
        hb: row.get(6)?,
        ra: row.get(7)?,
        mts: row.get(8)?,
        timestamp: row.get(9)?,
    })
}

#[async_trait::async_trait]
impl SnapshotBackend for SqliteBackend {
    fn describe(&self) -> String {
        format!("sqlite {}", self.path.display())
    }

    async fn load(&self) -> Result<Option<Snapshot>> {
        self.with_conn(|conn| read_snapshot(conn)).await
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let snapshot = *snapshot;
        self.with_conn(move |conn| write_snapshot(conn, &snapshot))
            .await?;
        debug!("Wrote snapshot to {}", self.describe());
        Ok(())
    }
}
