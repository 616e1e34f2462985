//! The single owner of the canonical snapshot.
//!
//! [`SnapshotStore`] is a cloneable handle to an actor task. The actor is the
//! only code that mutates the snapshot: it takes [`PartialUpdate`]s off a
//! bounded queue one at a time, merges each into the current snapshot,
//! recomputes the derived metrics, persists the result and only then starts on
//! the next update. Two writers can therefore never both merge on top of the
//! same prior state.
//!
//! Reads never touch the queue; they copy the latest published snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::snapshot::{PartialUpdate, Snapshot};
use crate::storage::SnapshotBackend;

/// Tuning for the store actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Capacity of the merge queue.
    pub queue_capacity: usize,
    /// Upper bound on a single save.
    pub persist_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
            persist_timeout: Duration::from_secs(2),
        }
    }
}

impl StoreOptions {
    /// Take the store settings from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_capacity: config.store.queue_capacity,
            persist_timeout: config.persist_timeout(),
        }
    }
}

/// Result of one merge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeOutcome {
    /// The snapshot after the merge.
    pub snapshot: Snapshot,
    /// Whether the snapshot reached the backend. When `false` the durable
    /// copy still holds an earlier snapshot.
    pub persisted: bool,
}

/// Counters kept by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Merges applied since start.
    pub merges: u64,
    /// Merges whose save failed or timed out.
    pub persist_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    merges: AtomicU64,
    persist_failures: AtomicU64,
}

#[derive(Debug)]
struct MergeRequest {
    update: PartialUpdate,
    reply: Option<oneshot::Sender<MergeOutcome>>,
}

/// Handle to the snapshot store actor.
///
/// The actor stops once every handle has been dropped and the queue drained.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    requests: mpsc::Sender<MergeRequest>,
    current: watch::Receiver<Snapshot>,
    counters: Arc<Counters>,
}

impl SnapshotStore {
    /// Load the persisted snapshot from `backend` and start the actor.
    ///
    /// A missing record starts from defaults; an unreadable one is logged and
    /// also starts from defaults. Derived fields of a loaded record are
    /// recomputed so they agree with its raw fields.
    pub async fn start(
        backend: Box<dyn SnapshotBackend>,
        options: StoreOptions,
    ) -> (Self, JoinHandle<()>) {
        let initial = match backend.load().await {
            Ok(Some(mut snapshot)) => {
                snapshot.recompute();
                info!(
                    "Restored snapshot from {} (timestamp {})",
                    backend.describe(),
                    snapshot.timestamp
                );
                snapshot
            }
            Ok(None) => {
                info!("No persisted snapshot in {}, starting fresh", backend.describe());
                Snapshot::default()
            }
            Err(e) => {
                warn!(
                    "Could not read persisted snapshot from {}: {}; starting fresh",
                    backend.describe(),
                    e
                );
                Snapshot::default()
            }
        };

        let (requests, inbox) = mpsc::channel(options.queue_capacity.max(1));
        let (publish, current) = watch::channel(initial);
        let counters = Arc::new(Counters::default());

        let actor = StoreActor {
            inbox,
            publish,
            backend,
            snapshot: initial,
            persist_timeout: options.persist_timeout,
            counters: Arc::clone(&counters),
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                requests,
                current,
                counters,
            },
            task,
        )
    }

    /// The current snapshot.
    #[must_use]
    pub fn read(&self) -> Snapshot {
        *self.current.borrow()
    }

    /// Merge `update` and wait for the resulting snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreClosed`] if the actor has stopped.
    pub async fn merge(&self, update: PartialUpdate) -> Result<MergeOutcome> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(MergeRequest {
                update,
                reply: Some(reply),
            })
            .await
            .map_err(|_| Error::StoreClosed)?;
        response.await.map_err(|_| Error::StoreClosed)
    }

    /// Queue `update` without waiting for it to be applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if the queue is at capacity, or
    /// [`Error::StoreClosed`] if the actor has stopped.
    pub fn submit(&self, update: PartialUpdate) -> Result<()> {
        self.requests
            .try_send(MergeRequest {
                update,
                reply: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Error::StoreClosed,
            })
    }

    /// Counters since start.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            merges: self.counters.merges.load(Ordering::Relaxed),
            persist_failures: self.counters.persist_failures.load(Ordering::Relaxed),
        }
    }
}

struct StoreActor {
    inbox: mpsc::Receiver<MergeRequest>,
    publish: watch::Sender<Snapshot>,
    backend: Box<dyn SnapshotBackend>,
    snapshot: Snapshot,
    persist_timeout: Duration,
    counters: Arc<Counters>,
}

impl StoreActor {
    async fn run(mut self) {
        debug!("Snapshot store started");
        while let Some(MergeRequest { update, reply }) = self.inbox.recv().await {
            let outcome = self.apply(&update).await;
            if let Some(reply) = reply {
                // The caller may have given up waiting; the merge stands.
                let _ = reply.send(outcome);
            }
        }
        info!(
            merges = self.counters.merges.load(Ordering::Relaxed),
            persist_failures = self.counters.persist_failures.load(Ordering::Relaxed),
            "Snapshot store stopped"
        );
    }

    async fn apply(&mut self, update: &PartialUpdate) -> MergeOutcome {
        let next = self
            .snapshot
            .merged(update, Utc::now().timestamp_millis());
        self.snapshot = next;

        let persisted = self.persist(&next).await;

        self.publish.send_replace(next);
        self.counters.merges.fetch_add(1, Ordering::Relaxed);
        if !persisted {
            self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            ax = next.ax,
            ay = next.ay,
            az = next.az,
            gx = next.gx,
            gy = next.gy,
            gz = next.gz,
            hb = next.hb,
            ra = next.ra,
            mts = next.mts,
            persisted,
            "Snapshot updated"
        );

        MergeOutcome {
            snapshot: next,
            persisted,
        }
    }

    async fn persist(&self, snapshot: &Snapshot) -> bool {
        match tokio::time::timeout(self.persist_timeout, self.backend.save(snapshot)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(
                    "Snapshot not persisted to {}: {}; durable copy is behind",
                    self.backend.describe(),
                    e
                );
                false
            }
            Err(_) => {
                let err = Error::timeout(format!("save to {}", self.backend.describe()));
                warn!("Snapshot not persisted: {}; durable copy is behind", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::init_test_logging;
    use crate::snapshot::{Axes, Field};
    use crate::storage::MemoryBackend;

    async fn start_with(backend: &MemoryBackend) -> (SnapshotStore, JoinHandle<()>) {
        init_test_logging();
        SnapshotStore::start(Box::new(backend.clone()), StoreOptions::default()).await
    }

    #[tokio::test]
    async fn test_starts_from_defaults() {
        let backend = MemoryBackend::new();
        let (store, _task) = start_with(&backend).await;

        assert_eq!(store.read(), Snapshot::default());
    }

    #[tokio::test]
    async fn test_restores_and_recomputes_persisted_snapshot() {
        // Stored derived fields disagree with ax/ay; they must be recomputed.
        let stale = Snapshot {
            ax: 3.0,
            hb: 0,
            ra: 0,
            mts: 123.0,
            timestamp: 77,
            ..Snapshot::default()
        };
        let backend = MemoryBackend::with_snapshot(stale);
        let (store, _task) = start_with(&backend).await;

        let snapshot = store.read();
        assert_eq!(snapshot.ax, 3.0);
        assert_eq!(snapshot.hb, 1);
        assert_eq!(snapshot.ra, 1);
        assert_eq!(snapshot.mts, crate::metrics::derive(3.0, 0.0).mts);
        assert_eq!(snapshot.timestamp, 77);
    }

    #[tokio::test]
    async fn test_merge_rotation_on_zero_snapshot() {
        let backend = MemoryBackend::new();
        let (store, _task) = start_with(&backend).await;

        let outcome = store
            .merge(PartialUpdate::gyroscope(Axes::new(1.0, 2.0, 3.0)))
            .await
            .unwrap();

        assert!(outcome.persisted);
        assert_eq!(outcome.snapshot.gyroscope(), Axes::new(1.0, 2.0, 3.0));
        assert_eq!(outcome.snapshot.acceleration(), Axes::default());
        assert!(outcome.snapshot.timestamp > 0);
        assert_eq!(store.read(), outcome.snapshot);
        assert_eq!(backend.last_saved(), Some(outcome.snapshot));
    }

    #[tokio::test]
    async fn test_merge_preserves_untouched_fields() {
        let backend = MemoryBackend::new();
        let (store, _task) = start_with(&backend).await;

        store
            .merge(PartialUpdate::gyroscope(Axes::new(4.0, 5.0, 6.0)))
            .await
            .unwrap();
        let outcome = store
            .merge(PartialUpdate::acceleration(Axes::new(0.5, 2.0, -1.0)))
            .await
            .unwrap();

        assert_eq!(outcome.snapshot.acceleration(), Axes::new(0.5, 2.0, -1.0));
        assert_eq!(outcome.snapshot.gyroscope(), Axes::new(4.0, 5.0, 6.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_disjoint_merges_are_not_lost() {
        let backend = MemoryBackend::new();
        let (store, _task) = start_with(&backend).await;

        for round in 0..50 {
            let value = f64::from(round);
            let accel_store = store.clone();
            let gyro_store = store.clone();
            let accel = tokio::spawn(async move {
                accel_store
                    .merge(PartialUpdate::acceleration(Axes::new(value, value, value)))
                    .await
            });
            let gyro = tokio::spawn(async move {
                gyro_store
                    .merge(PartialUpdate::gyroscope(Axes::new(-value, -value, -value)))
                    .await
            });
            accel.await.unwrap().unwrap();
            gyro.await.unwrap().unwrap();

            let snapshot = store.read();
            assert_eq!(snapshot.acceleration(), Axes::new(value, value, value));
            assert_eq!(snapshot.gyroscope(), Axes::new(-value, -value, -value));
        }
        assert_eq!(store.stats().merges, 100);
    }

    #[tokio::test]
    async fn test_merges_apply_in_submission_order() {
        let backend = MemoryBackend::new();
        let (store, _task) = start_with(&backend).await;

        for i in 1..=10 {
            store
                .submit(PartialUpdate::empty().with(Field::Az, f64::from(i)))
                .unwrap();
        }
        let last = store
            .merge(PartialUpdate::empty().with(Field::Gx, 1.0))
            .await
            .unwrap();

        assert_eq!(last.snapshot.az, 10.0);
        assert_eq!(last.snapshot.gx, 1.0);
        assert_eq!(backend.save_count(), 11);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_in_memory_value() {
        let backend = MemoryBackend::new();
        let (store, _task) = start_with(&backend).await;

        let first = store
            .merge(PartialUpdate::acceleration(Axes::new(1.0, 1.0, 1.0)))
            .await
            .unwrap();
        backend.set_fail_saves(true);

        let outcome = store
            .merge(PartialUpdate::acceleration(Axes::new(2.0, 2.0, 2.0)))
            .await
            .unwrap();

        assert!(!outcome.persisted);
        assert_eq!(store.read().ax, 2.0);
        assert_eq!(backend.last_saved(), Some(first.snapshot));
        assert_eq!(store.stats().persist_failures, 1);
    }

    #[tokio::test]
    async fn test_slow_persist_times_out_without_blocking_later_merges() {
        init_test_logging();
        let backend = MemoryBackend::new();
        backend.set_save_delay(Some(Duration::from_secs(30)));
        let options = StoreOptions {
            persist_timeout: Duration::from_millis(20),
            ..StoreOptions::default()
        };
        let (store, _task) = SnapshotStore::start(Box::new(backend.clone()), options).await;

        let outcome = store
            .merge(PartialUpdate::gyroscope(Axes::new(1.0, 0.0, 0.0)))
            .await
            .unwrap();
        assert!(!outcome.persisted);

        backend.set_save_delay(None);
        let outcome = store
            .merge(PartialUpdate::gyroscope(Axes::new(2.0, 0.0, 0.0)))
            .await
            .unwrap();
        assert!(outcome.persisted);
        assert_eq!(backend.last_saved().unwrap().gx, 2.0);
    }

    #[tokio::test]
    async fn test_submit_reports_full_queue() {
        init_test_logging();
        let backend = MemoryBackend::new();
        backend.set_save_delay(Some(Duration::from_millis(200)));
        let options = StoreOptions {
            queue_capacity: 1,
            persist_timeout: Duration::from_secs(5),
        };
        let (store, _task) = SnapshotStore::start(Box::new(backend.clone()), options).await;

        let mut saw_full = false;
        for _ in 0..10 {
            if matches!(
                store.submit(PartialUpdate::empty().with(Field::Ax, 1.0)),
                Err(Error::QueueFull)
            ) {
                saw_full = true;
                break;
            }
        }
        assert!(saw_full);
    }

    #[tokio::test]
    async fn test_actor_stops_when_handles_dropped() {
        let backend = MemoryBackend::new();
        let (store, task) = start_with(&backend).await;

        store
            .merge(PartialUpdate::empty().with(Field::Ax, 1.0))
            .await
            .unwrap();
        drop(store);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("store actor did not stop")
            .unwrap();
    }
}
