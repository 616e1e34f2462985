//! In-process backend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::SnapshotBackend;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

#[derive(Debug, Default)]
struct Inner {
    saved: Mutex<Option<Snapshot>>,
    fail_saves: AtomicBool,
    save_count: AtomicU64,
    save_delay: Mutex<Option<Duration>>,
}

/// Keeps the last saved snapshot in memory.
///
/// Clones share state, so a test can hand one clone to the store and keep
/// another to inspect what was saved or to inject failures.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that already holds `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let backend = Self::new();
        *backend.lock_saved() = Some(snapshot);
        backend
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Delay every save by `delay`.
    pub fn set_save_delay(&self, delay: Option<Duration>) {
        *self
            .inner
            .save_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// The last successfully saved snapshot.
    #[must_use]
    pub fn last_saved(&self) -> Option<Snapshot> {
        *self.lock_saved()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.inner.save_count.load(Ordering::SeqCst)
    }

    fn lock_saved(&self) -> std::sync::MutexGuard<'_, Option<Snapshot>> {
        self.inner
            .saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl SnapshotBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.last_saved())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let delay = *self
            .inner
            .save_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.inner.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::persist(self.describe(), "save failure injected"));
        }

        *self.lock_saved() = Some(*snapshot);
        self.inner.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
