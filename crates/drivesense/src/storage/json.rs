//! JSON file backend.
//!
//! The file holds one pretty-printed snapshot object. Saves go to
//! `<file>.tmp`, are flushed to disk, then renamed over the target, so a
//! concurrent reader of the file never sees a partial record.
//!
//! Each save runs start to finish on the blocking pool while holding the
//! writer lock. A save whose caller stopped waiting still completes, and it
//! completes before the next save touches the temp file. Saves are numbered
//! when issued; one that reaches the lock after a newer save has already
//! written is skipped, so the file never goes back to an older snapshot.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{ensure_parent_dir, SnapshotBackend};
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// Snapshot stored as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
    issued: Arc<AtomicU64>,
    /// Sequence number of the last save written to disk.
    written: Arc<Mutex<u64>>,
}

impl JsonFileBackend {
    /// Create a backend for `path`, creating parent directories if needed.
    ///
    /// The file itself is only created on the first save.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;
        Ok(Self {
            path,
            issued: Arc::new(AtomicU64::new(0)),
            written: Arc::new(Mutex::new(0)),
        })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

fn write_then_rename(temp: &Path, target: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(temp)?;
    file.write_all(body)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(temp, target)
}

/// Outcome of one blocking save.
enum Written {
    Saved,
    Superseded,
}

#[async_trait::async_trait]
impl SnapshotBackend for JsonFileBackend {
    fn describe(&self) -> String {
        format!("json file {}", self.path.display())
    }

    async fn load(&self) -> Result<Option<Snapshot>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_str(&raw)?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let temp = self.temp_path();
        let target = self.path.clone();
        let written = Arc::clone(&self.written);

        let outcome = tokio::task::spawn_blocking(move || {
            let mut last = written
                .lock()
                .map_err(|_| std::io::Error::other("json writer mutex poisoned"))?;
            if seq < *last {
                return Ok(Written::Superseded);
            }
            if let Err(e) = write_then_rename(&temp, &target, &body) {
                if let Err(cleanup) = std::fs::remove_file(&temp) {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove {}: {}", temp.display(), cleanup);
                    }
                }
                return Err(e);
            }
            *last = seq;
            Ok(Written::Saved)
        })
        .await
        .map_err(|e| Error::internal(format!("json save task failed: {e}")))?;

        match outcome {
            Ok(Written::Saved) => debug!("Wrote snapshot to {}", self.path.display()),
            Ok(Written::Superseded) => {
                debug!("Skipped superseded snapshot for {}", self.path.display());
            }
            Err(e) => return Err(Error::persist(self.describe(), e.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::snapshot::Axes;

    fn test_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("drivesense_json_{}_{name}", std::process::id()))
    }

    fn sample() -> Snapshot {
        Snapshot::from_raw(
            Axes::new(0.5, -2.25, 9.81),
            Axes::new(0.01, 0.02, -0.03),
            1_700_000_000_123,
        )
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let backend = JsonFileBackend::new(test_path("missing.json")).unwrap();
        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let path = test_path("roundtrip.json");
        let backend = JsonFileBackend::new(&path).unwrap();

        let snapshot = sample();
        backend.save(&snapshot).await.unwrap();
        let loaded = backend.load().await.unwrap().unwrap();

        assert_eq!(loaded, snapshot);
        assert!(!backend.temp_path().exists());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_file_contains_full_field_set() {
        let path = test_path("fields.json");
        let backend = JsonFileBackend::new(&path).unwrap();
        backend.save(&Snapshot::default()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 10);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_load_partial_record_fills_defaults() {
        let path = test_path("partial.json");
        std::fs::write(&path, r#"{"ax": 3.0, "gz": -1.0}"#).unwrap();
        let backend = JsonFileBackend::new(&path).unwrap();

        let loaded = backend.load().await.unwrap().unwrap();
        assert_eq!(loaded.ax, 3.0);
        assert_eq!(loaded.gz, -1.0);
        assert_eq!(loaded.ay, 0.0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_errors() {
        let path = test_path("corrupt.json");
        std::fs::write(&path, "{ not json").unwrap();
        let backend = JsonFileBackend::new(&path).unwrap();

        assert!(matches!(backend.load().await, Err(Error::Json(_))));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_record() {
        let path = test_path("atomic.json");
        let backend = JsonFileBackend::new(&path).unwrap();
        let first = sample();
        backend.save(&first).await.unwrap();

        // A directory squatting on the temp path makes the next write fail.
        let temp = backend.temp_path();
        std::fs::create_dir_all(&temp).unwrap();

        let result = backend.save(&Snapshot::default()).await;
        assert!(matches!(result, Err(Error::Persist { .. })));
        assert_eq!(backend.load().await.unwrap().unwrap(), first);

        let _ = std::fs::remove_dir_all(&temp);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_abandoned_save_does_not_clobber_next_save() {
        let path = test_path("abandoned.json");
        let backend = JsonFileBackend::new(&path).unwrap();
        let stale = sample();
        let fresh = Snapshot::from_raw(Axes::new(4.0, 1.0, 0.0), Axes::default(), 42);

        // Hold the writer so the first save stalls and its caller gives up.
        let guard = backend.written.lock().unwrap();
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), backend.save(&stale)).await;
        assert!(abandoned.is_err());
        drop(guard);

        backend.save(&fresh).await.unwrap();
        // Let the abandoned save reach the writer too.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(backend.load().await.unwrap(), Some(fresh));
        assert!(!backend.temp_path().exists());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_saves_issued_in_order_end_with_latest() {
        let path = test_path("ordered.json");
        let backend = JsonFileBackend::new(&path).unwrap();

        let mut last = Snapshot::default();
        for i in 0..50 {
            last = Snapshot::from_raw(
                Axes::new(f64::from(i), 0.0, 0.0),
                Axes::default(),
                i64::from(i),
            );
            let _ = tokio::time::timeout(Duration::from_micros(50), backend.save(&last)).await;
        }
        backend.save(&last).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), Some(last));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_new_creates_parent_dirs() {
        let root = test_path("nested");
        let _ = std::fs::remove_dir_all(&root);
        let backend = JsonFileBackend::new(root.join("deep/data.json")).unwrap();

        assert!(backend.path().parent().unwrap().exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_describe() {
        let backend = JsonFileBackend::new(test_path("describe.json")).unwrap();
        assert!(backend.describe().starts_with("json file"));
        assert!(backend.describe().contains("describe.json"));
    }
}
