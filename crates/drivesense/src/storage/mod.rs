//! Durable homes for the snapshot.
//!
//! A backend stores exactly one [`Snapshot`]. Every backend guarantees that a
//! reader sees either the previous record or the new one, never a mix:
//!
//! - [`JsonFileBackend`] writes a sibling temporary file and renames it over
//!   the target.
//! - [`SqliteBackend`] replaces a single row inside a transaction.
//! - [`MemoryBackend`] keeps the value in process, for tests and for running
//!   without persistence.

pub mod json;
pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::path::Path;

use tracing::debug;

use crate::config::{BackendKind, Config};
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

pub use json::JsonFileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Persistence for the single canonical snapshot.
#[async_trait::async_trait]
pub trait SnapshotBackend: Send + Sync + std::fmt::Debug {
    /// Human-readable description (kind and location), for logs.
    fn describe(&self) -> String;

    /// Load the stored snapshot, or `None` if nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored record exists but cannot be read.
    async fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace the stored snapshot.
    ///
    /// On error the previously stored record must still be readable.
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not complete.
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Open the backend selected by the configuration.
///
/// # Errors
///
/// Returns an error if the backend's storage location cannot be prepared.
pub fn open_backend(config: &Config) -> Result<Box<dyn SnapshotBackend>> {
    let backend: Box<dyn SnapshotBackend> = match config.storage.backend {
        BackendKind::Json => Box::new(JsonFileBackend::new(config.snapshot_path())?),
        BackendKind::Sqlite => Box::new(SqliteBackend::open(config.snapshot_path())?),
        BackendKind::Memory => Box::new(MemoryBackend::new()),
    };
    debug!("Using snapshot backend {}", backend.describe());
    Ok(backend)
}

/// Create the parent directories of `path` if they don't exist.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}
